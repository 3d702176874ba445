use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use validator::Validate;

use crate::core::config::Settings;
use crate::core::errors::EngineError;
use crate::core::metrics;
use crate::core::time::SharedClock;
use crate::repositories::backends::StorageBackend;
use crate::repositories::session_store::PersistentSessionStore;
use crate::schemas::session::{
    AnswerValue, Confirmation, DeadlineState, ItemStatus, PersistedSession, RegistrationStatus,
    SessionDescriptor,
};
use crate::services::answer_channel::AnswerSubmissionChannel;
use crate::services::autosave::{AutoSaveScheduler, FlushOutcome, SharedRecord};
use crate::services::deadline_clock::{compute_deadline, DeadlineClock};
use crate::services::events::{EngineEvent, EventBus};
use crate::services::reveal_gate::RevealGate;
use crate::services::session_backend::{with_retry, with_timeout, RetryPolicy, SessionBackend};
use crate::services::submission_coordinator::{
    SubmissionCoordinator, SubmissionCoordinatorParts, SubmissionState, SubmitOutcome,
    SubmitTrigger,
};
use crate::services::threshold_notifier::{Threshold, ThresholdNotifier};
use crate::tasks::scheduler::{self, RuntimeHandle};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub auto_save_debounce: Duration,
    pub auto_save_interval: Duration,
    pub thresholds: Vec<Threshold>,
    pub reveal_unlock_seconds: u64,
    pub submit_policy: RetryPolicy,
    pub answer_policy: RetryPolicy,
    pub submit_grace_period: Duration,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs(10);
        Self {
            tick_interval: Duration::from_secs(1),
            auto_save_debounce: Duration::from_secs(2),
            auto_save_interval: Duration::from_secs(10),
            thresholds: vec![Threshold::new("300", 300), Threshold::new("60", 60)],
            reveal_unlock_seconds: 300,
            submit_policy: RetryPolicy {
                max_attempts: 5,
                backoff_base: Duration::from_secs(1),
                timeout,
            },
            answer_policy: RetryPolicy {
                max_attempts: 2,
                backoff_base: Duration::from_secs(1),
                timeout,
            },
            submit_grace_period: Duration::from_secs(300),
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let timers = settings.timers();
        let submit = settings.submit();
        let timeout = Duration::from_secs(settings.api().request_timeout_seconds);
        let backoff_base = Duration::from_millis(submit.backoff_base_ms);

        Self {
            tick_interval: Duration::from_millis(timers.tick_interval_ms),
            auto_save_debounce: Duration::from_millis(timers.auto_save_debounce_ms),
            auto_save_interval: Duration::from_secs(timers.auto_save_interval_seconds),
            thresholds: timers
                .warning_thresholds
                .iter()
                .map(|(id, seconds)| {
                    Threshold::new(id.clone(), i64::try_from(*seconds).unwrap_or(i64::MAX))
                })
                .collect(),
            reveal_unlock_seconds: timers.reveal_unlock_seconds,
            submit_policy: RetryPolicy { max_attempts: submit.max_attempts, backoff_base, timeout },
            answer_policy: RetryPolicy {
                max_attempts: submit.answer_max_attempts,
                backoff_base,
                timeout,
            },
            submit_grace_period: Duration::from_secs(submit.grace_period_seconds),
            ..Self::default()
        }
    }
}

/// External collaborators of an engine instance.
#[derive(Clone)]
pub struct EngineDeps {
    pub backend: Arc<dyn SessionBackend>,
    pub storage: Arc<dyn StorageBackend>,
    pub clock: SharedClock,
}

/// One user's attempt at one timed session.
pub struct SessionEngine {
    config: EngineConfig,
    descriptor: Arc<SessionDescriptor>,
    record: SharedRecord,
    countdown: DeadlineClock,
    notifier: ThresholdNotifier,
    reveal: RevealGate,
    autosave: Arc<AutoSaveScheduler>,
    answers: AnswerSubmissionChannel,
    coordinator: SubmissionCoordinator,
    events: EventBus,
}

impl SessionEngine {
    /// Fetches the descriptor from the backend and opens the session.
    pub async fn open_remote(
        config: EngineConfig,
        deps: EngineDeps,
        session_id: &str,
        user_id: &str,
    ) -> Result<Arc<Self>, EngineError> {
        let backend = deps.backend.clone();
        let descriptor = with_retry(config.answer_policy, "descriptor fetch", || {
            backend.fetch_descriptor(session_id, user_id)
        })
        .await
        .map_err(|(err, attempts)| EngineError::NetworkFailure {
            operation: "descriptor fetch",
            attempts,
            message: err.to_string(),
        })?;

        if descriptor.session_id != session_id || descriptor.user_id != user_id {
            return Err(EngineError::InvalidDescriptor(format!(
                "backend returned session {} for user {}",
                descriptor.session_id, descriptor.user_id
            )));
        }

        Self::open(config, deps, descriptor).await
    }

    /// Rehydrates or creates the durable record and wires up every component.
    /// Timers are not started; see [`SessionEngine::start`].
    pub async fn open(
        config: EngineConfig,
        deps: EngineDeps,
        descriptor: SessionDescriptor,
    ) -> Result<Arc<Self>, EngineError> {
        descriptor.validate().map_err(|err| EngineError::InvalidDescriptor(err.to_string()))?;
        if let Some(duplicate) = descriptor.duplicate_item_id() {
            return Err(EngineError::InvalidDescriptor(format!("duplicate item id {duplicate}")));
        }

        let session_id = descriptor.session_id.clone();
        let user_id = descriptor.user_id.clone();
        let store = PersistentSessionStore::new(deps.storage.clone(), deps.clock.clone());

        let now_ms = deps.clock.now_ms();
        let mut known_submitted_at = match with_timeout(
            config.submit_policy.timeout,
            deps.backend.registration_status(&session_id, &user_id),
        )
        .await
        {
            Ok(RegistrationStatus::Submitted) => Some(now_ms),
            Ok(RegistrationStatus::Active) => None,
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %err,
                    "Registration status unavailable, trusting local state"
                );
                None
            }
        };

        let mut storage_readable = true;
        let persisted = if known_submitted_at.is_some() {
            None
        } else {
            match store.load(&session_id, &user_id).await {
                Ok(record) => {
                    known_submitted_at =
                        record.as_ref().and_then(|record| record.submitted_at_epoch_ms);
                    record
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %session_id,
                        user_id = %user_id,
                        error = %err,
                        "Session storage unreadable, holding writes until it recovers"
                    );
                    storage_readable = false;
                    None
                }
            }
        };
        if known_submitted_at.is_some() {
            store.clear(&session_id, &user_id).await;
        }

        let deadline = compute_deadline(&descriptor, persisted.as_ref().map(|r| &r.deadline), now_ms)?;
        let countdown = DeadlineClock::new(deadline, deps.clock.clone());
        let notifier = ThresholdNotifier::new(config.thresholds.clone());

        let record = match persisted {
            Some(mut record) => {
                let dropped = record.sanitize(&descriptor);
                if dropped > 0 {
                    tracing::warn!(session_id = %session_id, dropped, "Dropped stale answers on reload");
                }
                let suppressed = notifier.rehydrate(&mut record, countdown.tick());
                tracing::info!(
                    session_id = %session_id,
                    user_id = %user_id,
                    remaining_seconds = countdown.tick(),
                    confirmed = record.confirmed_answers.len(),
                    drafts = record.draft_answers.len(),
                    suppressed_warnings = suppressed.len(),
                    "Session rehydrated"
                );
                record
            }
            None => {
                tracing::info!(
                    session_id = %session_id,
                    user_id = %user_id,
                    remaining_seconds = countdown.tick(),
                    "Session started"
                );
                PersistedSession::new(&session_id, &user_id, deadline)
            }
        };

        let descriptor = Arc::new(descriptor);
        let record: SharedRecord = Arc::new(Mutex::new(record));
        let events = EventBus::new(config.event_capacity);
        let autosave = Arc::new(AutoSaveScheduler::new(
            record.clone(),
            store.clone(),
            events.clone(),
            config.auto_save_debounce,
            config.auto_save_interval,
        ));
        let answers = AnswerSubmissionChannel::new(
            descriptor.clone(),
            record.clone(),
            autosave.clone(),
            deps.backend.clone(),
            deps.clock.clone(),
            events.clone(),
            config.answer_policy,
        );
        let coordinator = SubmissionCoordinator::new(SubmissionCoordinatorParts {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            backend: deps.backend.clone(),
            store,
            autosave: autosave.clone(),
            countdown: countdown.clone(),
            events: events.clone(),
            policy: config.submit_policy,
            grace_period: config.submit_grace_period,
        });

        if let Some(at_epoch_ms) = known_submitted_at {
            tracing::info!(session_id = %session_id, user_id = %user_id, "Session already submitted");
            autosave.close().await;
            coordinator.mark_known_submitted(at_epoch_ms);
        } else if storage_readable {
            autosave.persist_now().await;
        } else {
            autosave.hold();
            autosave.notify_dirty();
        }

        Ok(Arc::new(Self {
            reveal: RevealGate::new(config.reveal_unlock_seconds),
            config,
            descriptor,
            record,
            countdown,
            notifier,
            autosave,
            answers,
            coordinator,
            events,
        }))
    }

    /// Spawns the countdown and auto-save loops.
    pub fn start(self: &Arc<Self>) -> RuntimeHandle {
        scheduler::spawn(self.clone())
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    pub fn deadline(&self) -> DeadlineState {
        self.countdown.deadline()
    }

    pub fn remaining_seconds(&self) -> i64 {
        self.countdown.tick()
    }

    pub fn submission_state(&self) -> SubmissionState {
        self.coordinator.state()
    }

    pub fn watch_submission(&self) -> watch::Receiver<SubmissionState> {
        self.coordinator.watch_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> PersistedSession {
        self.record.lock().await.clone()
    }

    pub(crate) fn tick_interval(&self) -> Duration {
        self.config.tick_interval
    }

    pub(crate) fn autosave(&self) -> &Arc<AutoSaveScheduler> {
        &self.autosave
    }

    pub(crate) fn watch_ticking(&self) -> watch::Receiver<bool> {
        self.coordinator.watch_ticking()
    }

    fn ensure_not_submitted(&self) -> Result<(), EngineError> {
        if self.coordinator.state().is_submitted() {
            return Err(EngineError::AlreadySubmitted);
        }
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), EngineError> {
        match self.coordinator.state() {
            SubmissionState::Submitted { .. } => Err(EngineError::AlreadySubmitted),
            SubmissionState::Submitting { .. } => Err(EngineError::NotActive),
            SubmissionState::Active if self.countdown.is_expired() => Err(EngineError::NotActive),
            SubmissionState::Active => Ok(()),
        }
    }

    fn ensure_item(&self, item_id: &str) -> Result<(), EngineError> {
        if !self.descriptor.has_item(item_id) {
            return Err(EngineError::UnknownItem(item_id.to_string()));
        }
        Ok(())
    }

    pub async fn current_item_index(&self) -> usize {
        self.record.lock().await.current_item_index
    }

    /// Moves to `index`, clamped to the item list. Returns the new index.
    pub async fn set_current_item(&self, index: usize) -> Result<usize, EngineError> {
        self.ensure_not_submitted()?;
        let last = self.descriptor.items.len().saturating_sub(1);
        let index = index.min(last);
        {
            let mut record = self.record.lock().await;
            if record.current_item_index == index {
                return Ok(index);
            }
            record.current_item_index = index;
        }
        self.autosave.notify_dirty();
        Ok(index)
    }

    pub async fn next_item(&self) -> Result<usize, EngineError> {
        let current = self.current_item_index().await;
        self.set_current_item(current.saturating_add(1)).await
    }

    pub async fn previous_item(&self) -> Result<usize, EngineError> {
        let current = self.current_item_index().await;
        self.set_current_item(current.saturating_sub(1)).await
    }

    /// Records a local edit. Written out by the debounce or periodic flush.
    pub async fn update_draft(&self, item_id: &str, value: AnswerValue) -> Result<(), EngineError> {
        self.ensure_editable()?;
        self.ensure_item(item_id)?;
        {
            let mut record = self.record.lock().await;
            if self.answers.is_in_flight(item_id) {
                return Err(EngineError::AnswerInFlight(item_id.to_string()));
            }
            if record.confirmed_answers.contains_key(item_id) {
                return Err(EngineError::ItemAlreadyConfirmed(item_id.to_string()));
            }
            record.draft_answers.insert(item_id.to_string(), value);
        }
        self.autosave.notify_dirty();
        Ok(())
    }

    pub async fn item_status(&self, item_id: &str) -> Result<ItemStatus, EngineError> {
        self.ensure_item(item_id)?;
        Ok(self.record.lock().await.item_status(item_id))
    }

    pub async fn submit_answer(
        &self,
        item_id: &str,
        value: AnswerValue,
    ) -> Result<Confirmation, EngineError> {
        self.ensure_editable()?;
        self.answers.submit(item_id, value).await
    }

    pub fn is_reveal_unlocked(&self, item_id: &str) -> bool {
        self.reveal.is_unlocked(&self.descriptor, &self.countdown, item_id)
    }

    pub fn reveal_unlocks_in_seconds(&self, item_id: &str) -> i64 {
        self.reveal.unlocks_in_seconds(&self.descriptor, &self.countdown, item_id)
    }

    pub async fn is_reveal_consumed(&self, item_id: &str) -> bool {
        RevealGate::is_consumed(&*self.record.lock().await, item_id)
    }

    /// Consumes the item's solution reveal. `Ok(false)` means it was already
    /// consumed earlier.
    pub async fn consume_reveal(&self, item_id: &str) -> Result<bool, EngineError> {
        self.ensure_not_submitted()?;
        let consumed = {
            let mut record = self.record.lock().await;
            self.reveal.consume(&self.descriptor, &self.countdown, &mut record, item_id)?
        };
        if !consumed {
            return Ok(false);
        }

        self.autosave.persist_now().await;
        metrics::record_reveal();
        tracing::info!(session_id = %self.descriptor.session_id, item_id, "Solution revealed");
        self.events.emit(EngineEvent::RevealConsumed { item_id: item_id.to_string() });
        Ok(true)
    }

    pub async fn request_submit(&self) -> Result<SubmitOutcome, EngineError> {
        self.coordinator.request_submit(SubmitTrigger::Manual).await
    }

    /// Whether local edits are waiting for the next auto-save.
    pub fn has_unsaved_changes(&self) -> bool {
        self.autosave.is_dirty()
    }

    pub async fn flush(&self) -> FlushOutcome {
        self.autosave.flush().await
    }

    /// One countdown step: emits the tick, fires due warnings and starts the
    /// deadline submission at zero. Returns the remaining seconds.
    pub async fn on_tick(&self) -> i64 {
        let remaining = self.countdown.tick();
        if !self.coordinator.state().is_active() || !self.coordinator.is_ticking() {
            return remaining;
        }
        self.events.emit(EngineEvent::Tick { remaining_seconds: remaining });

        let fired = self.notifier.on_tick(&mut *self.record.lock().await, remaining);
        if !fired.is_empty() {
            self.autosave.persist_now().await;
            for id in fired {
                metrics::record_warning(&id);
                tracing::info!(
                    session_id = %self.descriptor.session_id,
                    warning = %id,
                    remaining_seconds = remaining,
                    "Countdown warning"
                );
                self.events.emit(EngineEvent::Warning { id, remaining_seconds: remaining });
            }
        }

        if remaining == 0 {
            if let Err(err) = self.coordinator.request_submit(SubmitTrigger::Deadline).await {
                tracing::error!(
                    session_id = %self.descriptor.session_id,
                    error = %err,
                    "Deadline submission failed"
                );
            }
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::time::ManualClock;
    use crate::repositories::backends::MemoryBackend;
    use crate::test_support::{descriptor, FakeSessionBackend};

    const START: i64 = 1_700_000_000_000;

    struct Fixture {
        clock: Arc<ManualClock>,
        backend: Arc<FakeSessionBackend>,
        storage: Arc<MemoryBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clock: Arc::new(ManualClock::new(START)),
                backend: Arc::new(FakeSessionBackend::new()),
                storage: Arc::new(MemoryBackend::new()),
            }
        }

        fn deps(&self) -> EngineDeps {
            EngineDeps {
                backend: self.backend.clone(),
                storage: self.storage.clone(),
                clock: self.clock.clone(),
            }
        }

        async fn open(&self) -> Arc<SessionEngine> {
            SessionEngine::open(EngineConfig::default(), self.deps(), descriptor(600, &["q1", "q2", "q3"]))
                .await
                .expect("engine")
        }
    }

    #[tokio::test]
    async fn open_rejects_duplicate_items() {
        let fx = Fixture::new();
        let result =
            SessionEngine::open(EngineConfig::default(), fx.deps(), descriptor(600, &["q1", "q1"]))
                .await;
        assert!(matches!(result, Err(EngineError::InvalidDescriptor(_))));
    }

    #[tokio::test]
    async fn navigation_is_clamped_and_survives_reload() {
        let fx = Fixture::new();
        let engine = fx.open().await;

        assert_eq!(engine.previous_item().await, Ok(0));
        assert_eq!(engine.next_item().await, Ok(1));
        assert_eq!(engine.set_current_item(10).await, Ok(2));
        assert_eq!(engine.next_item().await, Ok(2));
        assert_eq!(engine.flush().await, FlushOutcome::Written);

        let reloaded = fx.open().await;
        assert_eq!(reloaded.current_item_index().await, 2);
    }

    #[tokio::test]
    async fn drafts_are_rejected_for_confirmed_items_and_after_deadline() {
        let fx = Fixture::new();
        let engine = fx.open().await;

        engine.submit_answer("q1", json!("a")).await.expect("confirmed");
        assert_eq!(
            engine.update_draft("q1", json!("b")).await,
            Err(EngineError::ItemAlreadyConfirmed("q1".to_string()))
        );
        engine.update_draft("q2", json!("draft")).await.expect("draft");
        assert_eq!(engine.item_status("q2").await, Ok(ItemStatus::Draft));
        assert_eq!(
            engine.item_status("zz").await,
            Err(EngineError::UnknownItem("zz".to_string()))
        );

        fx.clock.advance_secs(600);
        assert_eq!(engine.update_draft("q3", json!("late")).await, Err(EngineError::NotActive));
    }

    #[tokio::test]
    async fn reveal_is_locked_then_consumed_once_and_persisted() {
        let fx = Fixture::new();
        let engine = fx.open().await;
        let mut events = engine.subscribe();

        assert!(matches!(
            engine.consume_reveal("q1").await,
            Err(EngineError::RevealLocked { unlocks_in_seconds: 300, .. })
        ));

        fx.clock.advance_secs(300);
        assert!(engine.is_reveal_unlocked("q1"));
        assert_eq!(engine.consume_reveal("q1").await, Ok(true));
        assert_eq!(engine.consume_reveal("q1").await, Ok(false));
        assert_eq!(
            events.recv().await.expect("event"),
            EngineEvent::RevealConsumed { item_id: "q1".to_string() }
        );

        let reloaded = fx.open().await;
        assert!(reloaded.is_reveal_consumed("q1").await);
    }

    #[tokio::test]
    async fn already_submitted_registration_opens_terminal_and_clears_storage() {
        let fx = Fixture::new();
        let engine = fx.open().await;
        engine.update_draft("q1", json!("x")).await.expect("draft");
        engine.flush().await;

        fx.backend.set_registration(RegistrationStatus::Submitted);
        let reopened = fx.open().await;

        assert!(reopened.submission_state().is_submitted());
        assert_eq!(reopened.request_submit().await, Ok(SubmitOutcome::AlreadySubmitted));
        assert_eq!(
            reopened.update_draft("q1", json!("y")).await,
            Err(EngineError::AlreadySubmitted)
        );
        assert_eq!(fx.backend.submit_calls(), 0);
        assert_eq!(fx.storage.write_count(), 2);
        assert!(fx.storage.raw("picrete:session:s-1:u-1").await.is_none());
    }

    #[tokio::test]
    async fn open_rejects_durations_that_would_overflow_the_deadline() {
        let fx = Fixture::new();
        let result = SessionEngine::open(
            EngineConfig::default(),
            fx.deps(),
            descriptor(i64::MAX / 100, &["q1"]),
        )
        .await;
        assert!(matches!(result, Err(EngineError::InvalidDescriptor(_))));
        assert_eq!(fx.storage.write_count(), 0);
    }

    #[tokio::test]
    async fn unreadable_storage_at_open_never_replaces_the_stored_session() {
        let fx = Fixture::new();
        let engine = fx.open().await;
        let deadline = engine.deadline();
        engine.submit_answer("q1", json!("a")).await.expect("confirmed");
        drop(engine);
        let stored = fx.storage.raw("picrete:session:s-1:u-1").await.expect("stored");
        let writes = fx.storage.write_count();

        fx.clock.advance_secs(500);
        fx.storage.set_fail_reads(true);
        let degraded = fx.open().await;
        assert_eq!(degraded.flush().await, FlushOutcome::Failed);
        degraded.update_draft("q2", json!("typed")).await.expect("draft");
        assert_eq!(degraded.flush().await, FlushOutcome::Failed);

        fx.storage.set_fail_reads(false);
        assert_eq!(degraded.flush().await, FlushOutcome::Failed);
        assert_eq!(fx.storage.write_count(), writes);
        assert_eq!(fx.storage.raw("picrete:session:s-1:u-1").await, Some(stored));
        drop(degraded);

        let reloaded = fx.open().await;
        assert_eq!(reloaded.deadline(), deadline);
        assert_eq!(reloaded.remaining_seconds(), 100);
        assert_eq!(reloaded.item_status("q1").await, Ok(ItemStatus::Confirmed));
    }

    #[tokio::test]
    async fn unreadable_empty_storage_resumes_writes_once_readable() {
        let fx = Fixture::new();
        fx.storage.set_fail_reads(true);
        let engine = fx.open().await;
        let mut events = engine.subscribe();
        engine.update_draft("q1", json!("typed")).await.expect("draft");
        assert_eq!(engine.flush().await, FlushOutcome::Failed);
        assert_eq!(fx.storage.write_count(), 0);

        fx.storage.set_fail_reads(false);
        assert_eq!(engine.flush().await, FlushOutcome::Written);
        assert_eq!(events.recv().await.expect("event"), EngineEvent::StorageRecovered);

        let reloaded = fx.open().await;
        assert_eq!(reloaded.item_status("q1").await, Ok(ItemStatus::Draft));
    }

    #[tokio::test]
    async fn submitted_marker_keeps_reload_terminal_without_registration_status() {
        let fx = Fixture::new();
        let engine = fx.open().await;
        fx.storage.set_fail_removes(true);
        assert_eq!(engine.request_submit().await, Ok(SubmitOutcome::Submitted));
        assert!(fx.storage.raw("picrete:session:s-1:u-1").await.is_some());
        drop(engine);

        fx.backend.set_registration_unavailable(true);
        let reopened = fx.open().await;
        assert!(reopened.submission_state().is_submitted());
        assert_eq!(reopened.request_submit().await, Ok(SubmitOutcome::AlreadySubmitted));
        assert_eq!(
            reopened.update_draft("q1", json!("late")).await,
            Err(EngineError::AlreadySubmitted)
        );
        assert_eq!(fx.backend.submit_calls(), 1);
        drop(reopened);

        fx.storage.set_fail_removes(false);
        let cleaned = fx.open().await;
        assert!(cleaned.submission_state().is_submitted());
        assert!(fx.storage.raw("picrete:session:s-1:u-1").await.is_none());
    }

    #[tokio::test]
    async fn tick_at_zero_submits_exactly_once() {
        let fx = Fixture::new();
        let engine = fx.open().await;

        fx.clock.advance_secs(600);
        assert_eq!(engine.on_tick().await, 0);
        assert_eq!(engine.on_tick().await, 0);

        assert!(engine.submission_state().is_submitted());
        assert_eq!(fx.backend.submit_calls(), 1);
    }
}
