use crate::core::errors::EngineError;
use crate::schemas::session::{PersistedSession, SessionDescriptor};
use crate::services::deadline_clock::DeadlineClock;

/// Time-locked "view solution" capability. Consumption is one-way.
#[derive(Debug, Clone, Copy)]
pub struct RevealGate {
    default_unlock_seconds: u64,
}

impl RevealGate {
    pub fn new(default_unlock_seconds: u64) -> Self {
        Self { default_unlock_seconds }
    }

    fn unlock_after_ms(&self, descriptor: &SessionDescriptor, item_id: &str) -> i64 {
        let seconds = descriptor
            .item(item_id)
            .and_then(|item| item.reveal_after_seconds)
            .unwrap_or(self.default_unlock_seconds);
        i64::try_from(seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Seconds until the item unlocks, zero once unlocked.
    pub fn unlocks_in_seconds(
        &self,
        descriptor: &SessionDescriptor,
        clock: &DeadlineClock,
        item_id: &str,
    ) -> i64 {
        let left_ms = (self.unlock_after_ms(descriptor, item_id) - clock.elapsed_ms()).max(0);
        (left_ms + 999) / 1000
    }

    pub fn is_unlocked(
        &self,
        descriptor: &SessionDescriptor,
        clock: &DeadlineClock,
        item_id: &str,
    ) -> bool {
        clock.elapsed_ms() >= self.unlock_after_ms(descriptor, item_id)
    }

    pub fn is_consumed(record: &PersistedSession, item_id: &str) -> bool {
        record.reveal_consumed.contains(item_id)
    }

    /// Records the reveal. Returns `true` the first time, `false` if the item
    /// was already revealed. The caller persists the record.
    pub fn consume(
        &self,
        descriptor: &SessionDescriptor,
        clock: &DeadlineClock,
        record: &mut PersistedSession,
        item_id: &str,
    ) -> Result<bool, EngineError> {
        if !descriptor.has_item(item_id) {
            return Err(EngineError::UnknownItem(item_id.to_string()));
        }
        if Self::is_consumed(record, item_id) {
            return Ok(false);
        }
        if !self.is_unlocked(descriptor, clock, item_id) {
            return Err(EngineError::RevealLocked {
                item_id: item_id.to_string(),
                unlocks_in_seconds: self.unlocks_in_seconds(descriptor, clock, item_id),
            });
        }

        record.reveal_consumed.insert(item_id.to_string());
        Ok(true)
    }
}
