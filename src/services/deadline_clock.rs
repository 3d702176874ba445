use crate::core::errors::EngineError;
use crate::core::time::{format_epoch_ms, to_epoch_ms, SharedClock};
use crate::schemas::session::{DeadlineState, SessionDescriptor};

/// Derives the absolute deadline for a session. A persisted deadline always
/// wins; the descriptor is only consulted to report a mismatch.
pub fn compute_deadline(
    descriptor: &SessionDescriptor,
    rehydrated: Option<&DeadlineState>,
    now_ms: i64,
) -> Result<DeadlineState, EngineError> {
    if let Some(persisted) = rehydrated {
        if let Ok(fresh) = deadline_from_descriptor(descriptor, persisted.start_epoch_ms) {
            if fresh.end_epoch_ms != persisted.end_epoch_ms {
                let mismatch = EngineError::StaleDeadline {
                    persisted_end_ms: persisted.end_epoch_ms,
                    descriptor_end_ms: fresh.end_epoch_ms,
                };
                tracing::warn!(
                    session_id = %descriptor.session_id,
                    persisted_end = %format_epoch_ms(persisted.end_epoch_ms),
                    descriptor_end = %format_epoch_ms(fresh.end_epoch_ms),
                    error = %mismatch,
                    "Keeping persisted deadline"
                );
            }
        }
        return Ok(*persisted);
    }

    deadline_from_descriptor(descriptor, now_ms)
}

fn deadline_from_descriptor(
    descriptor: &SessionDescriptor,
    now_ms: i64,
) -> Result<DeadlineState, EngineError> {
    let start = descriptor.start_time.map(to_epoch_ms);
    let end = descriptor.end_time.map(to_epoch_ms);
    let duration_ms = match descriptor.duration_seconds {
        Some(seconds) if seconds <= 0 => {
            return Err(EngineError::InvalidDescriptor(
                "duration_seconds must be positive".to_string(),
            ));
        }
        Some(seconds) => Some(seconds.checked_mul(1000).ok_or_else(out_of_range)?),
        None => None,
    };

    let deadline = match (start, end, duration_ms) {
        (Some(start), Some(end), _) => DeadlineState { start_epoch_ms: start, end_epoch_ms: end },
        (Some(start), None, Some(duration)) => DeadlineState {
            start_epoch_ms: start,
            end_epoch_ms: start.checked_add(duration).ok_or_else(out_of_range)?,
        },
        // An attempt opened inside a window may not outlive the window.
        (None, Some(end), Some(duration)) => DeadlineState {
            start_epoch_ms: now_ms,
            end_epoch_ms: now_ms.checked_add(duration).ok_or_else(out_of_range)?.min(end),
        },
        (None, Some(end), None) => DeadlineState { start_epoch_ms: now_ms, end_epoch_ms: end },
        (None, None, Some(duration)) => DeadlineState {
            start_epoch_ms: now_ms,
            end_epoch_ms: now_ms.checked_add(duration).ok_or_else(out_of_range)?,
        },
        (_, None, None) => {
            return Err(EngineError::InvalidDescriptor(
                "session has neither end_time nor duration_seconds".to_string(),
            ));
        }
    };

    if deadline.end_epoch_ms <= deadline.start_epoch_ms {
        return Err(EngineError::InvalidDescriptor(format!(
            "session ends at {} which is not after its start {}",
            format_epoch_ms(deadline.end_epoch_ms),
            format_epoch_ms(deadline.start_epoch_ms)
        )));
    }

    Ok(deadline)
}

fn out_of_range() -> EngineError {
    EngineError::InvalidDescriptor("session deadline is out of range".to_string())
}

/// Countdown over a fixed deadline. Every read recomputes from the clock, so
/// missed ticks never accumulate drift.
#[derive(Clone)]
pub struct DeadlineClock {
    deadline: DeadlineState,
    clock: SharedClock,
}

impl DeadlineClock {
    pub fn new(deadline: DeadlineState, clock: SharedClock) -> Self {
        Self { deadline, clock }
    }

    pub fn deadline(&self) -> DeadlineState {
        self.deadline
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn remaining_ms(&self) -> i64 {
        self.deadline.end_epoch_ms.saturating_sub(self.clock.now_ms()).max(0)
    }

    /// Whole seconds left, rounded down and clamped at zero.
    pub fn tick(&self) -> i64 {
        self.remaining_ms().div_euclid(1000)
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.clock.now_ms().saturating_sub(self.deadline.start_epoch_ms).max(0)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_ms() == 0
    }

    /// Milliseconds past the deadline, zero while the session is still running.
    pub fn overdue_ms(&self) -> i64 {
        self.clock.now_ms().saturating_sub(self.deadline.end_epoch_ms).max(0)
    }
}
