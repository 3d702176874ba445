use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use crate::core::errors::EngineError;
use crate::core::metrics;
use crate::core::time::SharedClock;
use crate::schemas::session::{AnswerValue, Confirmation, ConfirmedAnswer, ItemId, SessionDescriptor};
use crate::services::autosave::{AutoSaveScheduler, SharedRecord};
use crate::services::events::{EngineEvent, EventBus};
use crate::services::session_backend::{with_retry, RetryPolicy, SessionBackend};

/// Removes the item from the in-flight set when the submission finishes,
/// whichever way it finishes.
struct InFlightGuard<'a> {
    in_flight: &'a StdMutex<HashSet<ItemId>>,
    item_id: ItemId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.item_id);
        }
    }
}

/// Per-item answer submission with an optimistic draft that is rolled back
/// when the backend never confirms.
pub(crate) struct AnswerSubmissionChannel {
    descriptor: Arc<SessionDescriptor>,
    record: SharedRecord,
    autosave: Arc<AutoSaveScheduler>,
    backend: Arc<dyn SessionBackend>,
    clock: SharedClock,
    events: EventBus,
    policy: RetryPolicy,
    in_flight: StdMutex<HashSet<ItemId>>,
}

impl AnswerSubmissionChannel {
    pub(crate) fn new(
        descriptor: Arc<SessionDescriptor>,
        record: SharedRecord,
        autosave: Arc<AutoSaveScheduler>,
        backend: Arc<dyn SessionBackend>,
        clock: SharedClock,
        events: EventBus,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            descriptor,
            record,
            autosave,
            backend,
            clock,
            events,
            policy,
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    pub(crate) fn is_in_flight(&self, item_id: &str) -> bool {
        self.in_flight.lock().map(|set| set.contains(item_id)).unwrap_or(false)
    }

    fn claim(&self, item_id: &str) -> Result<InFlightGuard<'_>, EngineError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| EngineError::AnswerInFlight(item_id.to_string()))?;
        if !in_flight.insert(item_id.to_string()) {
            return Err(EngineError::AnswerInFlight(item_id.to_string()));
        }
        Ok(InFlightGuard { in_flight: &self.in_flight, item_id: item_id.to_string() })
    }

    pub(crate) async fn submit(
        &self,
        item_id: &str,
        value: AnswerValue,
    ) -> Result<Confirmation, EngineError> {
        if !self.descriptor.has_item(item_id) {
            return Err(EngineError::UnknownItem(item_id.to_string()));
        }
        let _guard = self.claim(item_id)?;

        {
            let mut record = self.record.lock().await;
            if record.confirmed_answers.contains_key(item_id) {
                return Err(EngineError::ItemAlreadyConfirmed(item_id.to_string()));
            }
            record.draft_answers.insert(item_id.to_string(), value.clone());
        }
        self.autosave.persist_now().await;

        let session_id = self.descriptor.session_id.as_str();
        let user_id = self.descriptor.user_id.as_str();
        let result = with_retry(self.policy, "answer submit", || {
            self.backend.submit_answer(session_id, user_id, item_id, &value)
        })
        .await;

        match result {
            Ok(confirmation) => {
                {
                    let mut record = self.record.lock().await;
                    record.draft_answers.remove(item_id);
                    record.confirmed_answers.entry(item_id.to_string()).or_insert(
                        ConfirmedAnswer {
                            value,
                            is_correct: confirmation.is_correct,
                            score: confirmation.score,
                            confirmed_at_epoch_ms: self.clock.now_ms(),
                        },
                    );
                }
                self.autosave.persist_now().await;

                metrics::record_answer("confirmed");
                tracing::info!(session_id, item_id, "Answer confirmed");
                self.events.emit(EngineEvent::AnswerConfirmed {
                    item_id: item_id.to_string(),
                    confirmation: confirmation.clone(),
                });
                Ok(confirmation)
            }
            Err((err, attempts)) => {
                // Drafts of an in-flight item are refused, so this is still ours.
                self.record.lock().await.draft_answers.remove(item_id);
                self.autosave.persist_now().await;

                let failure = EngineError::NetworkFailure {
                    operation: "answer submit",
                    attempts,
                    message: err.to_string(),
                };
                metrics::record_answer("rejected");
                tracing::warn!(session_id, item_id, attempts, error = %err, "Answer submission failed");
                self.events.emit(EngineEvent::AnswerRejected {
                    item_id: item_id.to_string(),
                    error: failure.clone(),
                });
                Err(failure)
            }
        }
    }
}
