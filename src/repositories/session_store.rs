use std::sync::Arc;

use crate::core::time::SharedClock;
use crate::repositories::backends::{StorageBackend, StoreError};
use crate::schemas::session::{PersistedSession, SessionPatch};

pub(crate) fn session_key(session_id: &str, user_id: &str) -> String {
    format!("picrete:session:{session_id}:{user_id}")
}

/// Single entry point for the durable session record. Write failures are
/// logged and reported as `false`. A failed read is returned as an error, since
/// the caller must not mistake it for a missing record.
#[derive(Clone)]
pub struct PersistentSessionStore {
    backend: Arc<dyn StorageBackend>,
    clock: SharedClock,
}

impl PersistentSessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: SharedClock) -> Self {
        Self { backend, clock }
    }

    /// `Ok(None)` when nothing usable is stored. Corrupted records and records
    /// of another owner count as nothing stored.
    pub async fn load(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<PersistedSession>, StoreError> {
        let key = session_key(session_id, user_id);
        let raw = match self.backend.read(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::warn!(session_id, user_id, error = %err, "Session storage read failed");
                return Err(err);
            }
        };

        match serde_json::from_str::<PersistedSession>(&raw) {
            Ok(record) if record.session_id == session_id && record.user_id == user_id => {
                Ok(Some(record))
            }
            Ok(record) => {
                tracing::warn!(
                    session_id,
                    user_id,
                    stored_session_id = %record.session_id,
                    stored_user_id = %record.user_id,
                    "Stored session belongs to another owner, ignoring it"
                );
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(session_id, user_id, error = %err, "Stored session is corrupted");
                Ok(None)
            }
        }
    }

    /// Merges `patch` into `record` and writes the full record in one call.
    pub async fn save(&self, record: &mut PersistedSession, patch: SessionPatch) -> bool {
        record.apply(patch);
        self.persist(record).await
    }

    /// Writes the whole record as-is. Stamps `last_persisted_at_epoch_ms` first.
    pub async fn persist(&self, record: &mut PersistedSession) -> bool {
        let previous_stamp = record.last_persisted_at_epoch_ms;
        record.last_persisted_at_epoch_ms = self.clock.now_ms();

        let payload = match serde_json::to_string(&*record) {
            Ok(payload) => payload,
            Err(err) => {
                record.last_persisted_at_epoch_ms = previous_stamp;
                tracing::error!(
                    session_id = %record.session_id,
                    error = %err,
                    "Failed to serialize session record"
                );
                return false;
            }
        };

        let key = session_key(&record.session_id, &record.user_id);
        match self.backend.write(&key, &payload).await {
            Ok(()) => true,
            Err(err) => {
                record.last_persisted_at_epoch_ms = previous_stamp;
                tracing::warn!(
                    session_id = %record.session_id,
                    user_id = %record.user_id,
                    error = %err,
                    "Session storage write failed, continuing in memory"
                );
                false
            }
        }
    }

    pub async fn clear(&self, session_id: &str, user_id: &str) -> bool {
        match self.backend.remove(&session_key(session_id, user_id)).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(session_id, user_id, error = %err, "Failed to clear stored session");
                false
            }
        }
    }
}
