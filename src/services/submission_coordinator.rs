use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use crate::core::errors::EngineError;
use crate::core::metrics;
use crate::repositories::session_store::PersistentSessionStore;
use crate::services::autosave::AutoSaveScheduler;
use crate::services::deadline_clock::DeadlineClock;
use crate::services::events::{EngineEvent, EventBus};
use crate::services::session_backend::{with_timeout, RetryPolicy, SessionBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    Manual,
    Deadline,
}

impl SubmitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Deadline => "deadline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Active,
    Submitting { trigger: SubmitTrigger, attempt: u32 },
    Submitted { at_epoch_ms: i64 },
}

impl SubmissionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmissionEvent {
    Requested(SubmitTrigger),
    AttemptStarted,
    Confirmed { at_epoch_ms: i64 },
    Abandoned,
    /// The backend already holds a submission for this session.
    KnownSubmitted { at_epoch_ms: i64 },
}

/// Pure transition table. `None` means the event is ignored in that state.
pub(crate) fn transition(state: SubmissionState, event: SubmissionEvent) -> Option<SubmissionState> {
    use SubmissionEvent as E;
    use SubmissionState as S;

    match (state, event) {
        (S::Active, E::Requested(trigger)) => Some(S::Submitting { trigger, attempt: 0 }),
        (S::Submitting { trigger, attempt }, E::AttemptStarted) => {
            Some(S::Submitting { trigger, attempt: attempt + 1 })
        }
        (S::Submitting { .. }, E::Confirmed { at_epoch_ms }) => Some(S::Submitted { at_epoch_ms }),
        (S::Submitting { .. }, E::Abandoned) => Some(S::Active),
        (S::Active | S::Submitting { .. }, E::KnownSubmitted { at_epoch_ms }) => {
            Some(S::Submitted { at_epoch_ms })
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// Another submission is running; this request was dropped.
    AlreadyInFlight,
    AlreadySubmitted,
}

pub(crate) struct SubmissionCoordinatorParts {
    pub(crate) session_id: String,
    pub(crate) user_id: String,
    pub(crate) backend: Arc<dyn SessionBackend>,
    pub(crate) store: PersistentSessionStore,
    pub(crate) autosave: Arc<AutoSaveScheduler>,
    pub(crate) countdown: DeadlineClock,
    pub(crate) events: EventBus,
    pub(crate) policy: RetryPolicy,
    pub(crate) grace_period: Duration,
}

/// Exactly-once final submission. Manual and deadline triggers race through
/// the same guarded transition, so only the first one reaches the backend.
pub(crate) struct SubmissionCoordinator {
    parts: SubmissionCoordinatorParts,
    idempotency_key: String,
    state: watch::Sender<SubmissionState>,
    ticking: watch::Sender<bool>,
}

impl SubmissionCoordinator {
    pub(crate) fn new(parts: SubmissionCoordinatorParts) -> Self {
        let (state, _) = watch::channel(SubmissionState::Active);
        let (ticking, _) = watch::channel(true);
        Self { parts, idempotency_key: Uuid::new_v4().to_string(), state, ticking }
    }

    pub(crate) fn state(&self) -> SubmissionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SubmissionState> {
        self.state.subscribe()
    }

    pub(crate) fn watch_ticking(&self) -> watch::Receiver<bool> {
        self.ticking.subscribe()
    }

    pub(crate) fn is_ticking(&self) -> bool {
        *self.ticking.borrow()
    }

    pub(crate) fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    fn apply(&self, event: SubmissionEvent) -> bool {
        self.state.send_if_modified(|state| match transition(*state, event) {
            Some(next) => {
                *state = next;
                true
            }
            None => false,
        })
    }

    /// Puts the coordinator straight into the terminal state without calling
    /// the backend. Used when the backend reports an earlier submission.
    pub(crate) fn mark_known_submitted(&self, at_epoch_ms: i64) {
        self.ticking.send_replace(false);
        self.apply(SubmissionEvent::KnownSubmitted { at_epoch_ms });
    }

    pub(crate) async fn request_submit(
        &self,
        trigger: SubmitTrigger,
    ) -> Result<SubmitOutcome, EngineError> {
        if !self.apply(SubmissionEvent::Requested(trigger)) {
            let outcome = match self.state() {
                SubmissionState::Submitted { .. } => SubmitOutcome::AlreadySubmitted,
                _ => SubmitOutcome::AlreadyInFlight,
            };
            tracing::debug!(
                session_id = %self.parts.session_id,
                trigger = trigger.as_str(),
                ?outcome,
                "Submit request dropped"
            );
            return Ok(outcome);
        }

        self.ticking.send_replace(false);
        self.parts.events.emit(EngineEvent::SubmitStarted { trigger });
        tracing::info!(
            session_id = %self.parts.session_id,
            user_id = %self.parts.user_id,
            trigger = trigger.as_str(),
            idempotency_key = self.idempotency_key(),
            "Submitting session"
        );

        self.parts.autosave.persist_now().await;
        self.submit_with_retry(trigger).await
    }

    async fn submit_with_retry(&self, trigger: SubmitTrigger) -> Result<SubmitOutcome, EngineError> {
        let policy = self.parts.policy;
        let grace_ms = i64::try_from(self.parts.grace_period.as_millis()).unwrap_or(i64::MAX);
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.apply(SubmissionEvent::AttemptStarted);

            let result = with_timeout(
                policy.timeout,
                self.parts.backend.mark_submitted(
                    &self.parts.session_id,
                    &self.parts.user_id,
                    &self.idempotency_key,
                ),
            )
            .await;

            let err = match result {
                Ok(()) => return Ok(self.finish(trigger, attempts).await),
                Err(err) => err,
            };
            metrics::record_submit("attempt_failed");

            let failure = EngineError::NetworkFailure {
                operation: "session submit",
                attempts,
                message: err.to_string(),
            };

            if !self.parts.countdown.is_expired() {
                // Time is left: hand control back to the user.
                self.abandon(failure.clone(), true);
                tracing::warn!(
                    session_id = %self.parts.session_id,
                    trigger = trigger.as_str(),
                    error = %err,
                    "Session submit failed, session resumed"
                );
                return Err(failure);
            }

            let within_grace = self.parts.countdown.overdue_ms() <= grace_ms;
            if attempts >= policy.max_attempts || !within_grace || !err.is_transient() {
                self.abandon(failure.clone(), false);
                tracing::error!(
                    session_id = %self.parts.session_id,
                    trigger = trigger.as_str(),
                    attempts,
                    within_grace,
                    error = %err,
                    "Session submit abandoned after deadline"
                );
                return Err(failure);
            }

            let backoff = policy.backoff_for(attempts);
            self.parts.events.emit(EngineEvent::SubmitFailed { error: failure, retrying: true });
            tracing::warn!(
                session_id = %self.parts.session_id,
                attempts,
                error = %err,
                ?backoff,
                "Session submit failed after deadline, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn finish(&self, trigger: SubmitTrigger, attempts: u32) -> SubmitOutcome {
        let at_epoch_ms = self.parts.countdown.now_ms();
        // The marker keeps a reload terminal if the record outlives `clear`.
        self.parts.autosave.seal(at_epoch_ms).await;
        if !self.parts.store.clear(&self.parts.session_id, &self.parts.user_id).await {
            tracing::warn!(
                session_id = %self.parts.session_id,
                "Submitted session record could not be removed"
            );
        }

        self.apply(SubmissionEvent::Confirmed { at_epoch_ms });
        metrics::record_submit("submitted");
        self.parts.events.emit(EngineEvent::Submitted { at_epoch_ms });
        tracing::info!(
            session_id = %self.parts.session_id,
            user_id = %self.parts.user_id,
            trigger = trigger.as_str(),
            attempts,
            "Session submitted"
        );
        SubmitOutcome::Submitted
    }

    // After the deadline the countdown stays stopped; only a manual request
    // can start another attempt.
    fn abandon(&self, failure: EngineError, resume_ticking: bool) {
        self.apply(SubmissionEvent::Abandoned);
        if resume_ticking {
            self.ticking.send_replace(true);
        }
        metrics::record_submit("failed");
        self.parts.events.emit(EngineEvent::SubmitFailed { error: failure, retrying: false });
    }
}
