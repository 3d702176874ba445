use thiserror::Error;

/// Failures surfaced by the session engine to the embedding UI.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("durable session storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    NetworkFailure { operation: &'static str, attempts: u32, message: String },
    #[error("session has already been submitted")]
    AlreadySubmitted,
    #[error("persisted deadline {persisted_end_ms} disagrees with descriptor deadline {descriptor_end_ms}")]
    StaleDeadline { persisted_end_ms: i64, descriptor_end_ms: i64 },
    #[error("invalid session descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("unknown item {0}")]
    UnknownItem(String),
    #[error("item {0} is already confirmed")]
    ItemAlreadyConfirmed(String),
    #[error("an answer for item {0} is already in flight")]
    AnswerInFlight(String),
    #[error("solution for item {item_id} unlocks in {unlocks_in_seconds}s")]
    RevealLocked { item_id: String, unlocks_in_seconds: i64 },
    #[error("session is not accepting changes")]
    NotActive,
}
