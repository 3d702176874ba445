use crate::schemas::session::{PersistedSession, WarningId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Threshold {
    pub id: WarningId,
    pub remaining_seconds_at_or_below: i64,
}

impl Threshold {
    pub fn new(id: impl Into<WarningId>, remaining_seconds_at_or_below: i64) -> Self {
        Self { id: id.into(), remaining_seconds_at_or_below }
    }
}

/// One-shot countdown warnings. Fired ids live in the persisted record, so a
/// reload neither repeats nor replays a warning.
#[derive(Debug, Clone)]
pub struct ThresholdNotifier {
    thresholds: Vec<Threshold>,
}

impl ThresholdNotifier {
    pub fn new(mut thresholds: Vec<Threshold>) -> Self {
        thresholds.sort_by(|left, right| {
            right.remaining_seconds_at_or_below.cmp(&left.remaining_seconds_at_or_below)
        });
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    /// Marks warnings whose moment passed while nobody was watching as fired
    /// without emitting them. Returns the ids that were silently marked.
    pub fn rehydrate(&self, record: &mut PersistedSession, remaining: i64) -> Vec<WarningId> {
        let mut suppressed = Vec::new();
        for threshold in &self.thresholds {
            if remaining <= threshold.remaining_seconds_at_or_below
                && record.warnings_fired.insert(threshold.id.clone())
            {
                suppressed.push(threshold.id.clone());
            }
        }
        suppressed
    }

    /// Returns warnings to emit on this tick, most distant threshold first.
    /// A threshold skipped over between two ticks still fires once.
    pub fn on_tick(&self, record: &mut PersistedSession, remaining: i64) -> Vec<WarningId> {
        let mut fired = Vec::new();
        for threshold in &self.thresholds {
            if remaining <= threshold.remaining_seconds_at_or_below
                && record.warnings_fired.insert(threshold.id.clone())
            {
                tracing::debug!(
                    session_id = %record.session_id,
                    warning = %threshold.id,
                    remaining,
                    "Countdown warning reached"
                );
                fired.push(threshold.id.clone());
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::session::DeadlineState;

    fn record() -> PersistedSession {
        PersistedSession::new("s-1", "u-1", DeadlineState { start_epoch_ms: 0, end_epoch_ms: 600_000 })
    }

    fn notifier() -> ThresholdNotifier {
        ThresholdNotifier::new(vec![Threshold::new("60", 60), Threshold::new("300", 300)])
    }

    #[test]
    fn each_threshold_fires_once_at_its_crossing() {
        let notifier = notifier();
        let mut record = record();

        let mut log = Vec::new();
        for remaining in (0..=600).rev() {
            for id in notifier.on_tick(&mut record, remaining) {
                log.push((remaining, id));
            }
        }

        assert_eq!(log, vec![(300, "300".to_string()), (60, "60".to_string())]);
    }

    #[test]
    fn skipped_ticks_still_fire_every_crossed_threshold_once() {
        let notifier = notifier();
        let mut record = record();

        assert!(notifier.on_tick(&mut record, 400).is_empty());
        assert_eq!(notifier.on_tick(&mut record, 30), vec!["300".to_string(), "60".to_string()]);
        assert!(notifier.on_tick(&mut record, 29).is_empty());
    }

    #[test]
    fn rehydrate_suppresses_crossed_warnings_and_keeps_pending_ones() {
        let notifier = notifier();
        let mut record = record();

        let suppressed = notifier.rehydrate(&mut record, 250);
        assert_eq!(suppressed, vec!["300".to_string()]);
        assert!(notifier.on_tick(&mut record, 249).is_empty());
        assert_eq!(notifier.on_tick(&mut record, 60), vec!["60".to_string()]);
    }

    #[test]
    fn already_fired_warning_survives_reload() {
        let mut record = record();
        let first = notifier();
        assert_eq!(first.on_tick(&mut record, 299), vec!["300".to_string()]);

        let reloaded = notifier();
        assert!(reloaded.rehydrate(&mut record, 250).is_empty());
        assert!(reloaded.on_tick(&mut record, 249).is_empty());
        assert!(record.warnings_fired.contains("300"));
    }
}
