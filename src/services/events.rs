use tokio::sync::broadcast;

use crate::core::errors::EngineError;
use crate::schemas::session::{Confirmation, ItemId, WarningId};
use crate::services::submission_coordinator::SubmitTrigger;

/// Change notifications for whatever UI layer embeds the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Tick { remaining_seconds: i64 },
    Warning { id: WarningId, remaining_seconds: i64 },
    RevealConsumed { item_id: ItemId },
    AnswerConfirmed { item_id: ItemId, confirmation: Confirmation },
    AnswerRejected { item_id: ItemId, error: EngineError },
    SubmitStarted { trigger: SubmitTrigger },
    SubmitFailed { error: EngineError, retrying: bool },
    Submitted { at_epoch_ms: i64 },
    StorageDegraded { error: EngineError },
    StorageRecovered,
}

#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// No subscribers is not an error; the engine runs headless too.
    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}
