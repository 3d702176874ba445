use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Wall-clock source for every engine time read. Values are unix epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        to_epoch_ms(OffsetDateTime::now_utc())
    }
}

/// Clock that only moves when told to. Used to replay reloads and missed ticks.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self { now_ms: AtomicI64::new(now_ms) }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, seconds: i64) {
        self.now_ms.fetch_add(seconds * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

pub(crate) fn to_epoch_ms(value: OffsetDateTime) -> i64 {
    (value.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn format_epoch_ms(value: i64) -> String {
    match OffsetDateTime::from_unix_timestamp_nanos(i128::from(value) * 1_000_000) {
        Ok(moment) => moment.format(&Rfc3339).unwrap_or_else(|_| moment.to_string()),
        Err(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn epoch_ms_keeps_millisecond_precision() {
        let value = datetime!(2025-01-02 10:20:30.250 UTC);
        assert_eq!(to_epoch_ms(value), 1_735_813_230_250);
    }

    #[test]
    fn format_epoch_ms_outputs_utc_z() {
        assert_eq!(format_epoch_ms(1_735_813_230_000), "2025-01-02T10:20:30Z");
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_secs(5);
        assert_eq!(clock.now_ms(), 6_000);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }
}
