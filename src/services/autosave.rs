use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use crate::core::errors::EngineError;
use crate::core::metrics;
use crate::repositories::session_store::PersistentSessionStore;
use crate::schemas::session::PersistedSession;
use crate::services::events::{EngineEvent, EventBus};

pub(crate) type SharedRecord = Arc<Mutex<PersistedSession>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was dirty.
    Clean,
    Written,
    /// Storage refused the write; the edit stays dirty and in memory.
    Failed,
    /// The session was submitted and its record removed.
    Closed,
}

/// Owns every write of one session's record. Edits mark the record dirty;
/// a debounce timer and a periodic timer turn dirt into whole-record writes.
pub(crate) struct AutoSaveScheduler {
    record: SharedRecord,
    store: PersistentSessionStore,
    events: EventBus,
    debounce: Duration,
    period: Duration,
    write_lock: Mutex<()>,
    kick: Notify,
    dirty: AtomicBool,
    degraded: AtomicBool,
    closed: AtomicBool,
    /// Storage could not be read at open; nothing is written until a read
    /// shows there is no earlier record to overwrite.
    held: AtomicBool,
    /// A held read found an earlier record. It is left untouched for good.
    shadowed: AtomicBool,
}

impl AutoSaveScheduler {
    pub(crate) fn new(
        record: SharedRecord,
        store: PersistentSessionStore,
        events: EventBus,
        debounce: Duration,
        period: Duration,
    ) -> Self {
        Self {
            record,
            store,
            events,
            debounce,
            period,
            write_lock: Mutex::new(()),
            kick: Notify::new(),
            dirty: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            held: AtomicBool::new(false),
            shadowed: AtomicBool::new(false),
        }
    }

    /// Keeps the record memory-only until storage is readable again.
    pub(crate) fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
        self.mark_degraded("session storage unreadable, keeping the session in memory");
    }


    pub(crate) fn notify_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.kick.notify_one();
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Writes the record if anything changed since the last write.
    pub(crate) async fn flush(&self) -> FlushOutcome {
        let _write = self.write_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return FlushOutcome::Closed;
        }
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return FlushOutcome::Clean;
        }
        self.write_snapshot().await
    }

    /// Writes the record regardless of the dirty flag.
    pub(crate) async fn persist_now(&self) -> FlushOutcome {
        let _write = self.write_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return FlushOutcome::Closed;
        }
        self.dirty.store(false, Ordering::SeqCst);
        self.write_snapshot().await
    }

    /// Stops all further writes. Called right before the record is removed.
    pub(crate) async fn close(&self) {
        let _write = self.write_lock.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Writes the record one last time with the submitted marker set, then
    /// stops all further writes.
    pub(crate) async fn seal(&self, submitted_at_epoch_ms: i64) -> FlushOutcome {
        let _write = self.write_lock.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return FlushOutcome::Closed;
        }
        self.record.lock().await.submitted_at_epoch_ms = Some(submitted_at_epoch_ms);
        let outcome = self.write_snapshot().await;
        self.dirty.store(false, Ordering::SeqCst);
        outcome
    }

    // Caller holds `write_lock`.
    async fn release_hold(&self) -> bool {
        if self.shadowed.load(Ordering::SeqCst) {
            return false;
        }
        let (session_id, user_id) = {
            let record = self.record.lock().await;
            (record.session_id.clone(), record.user_id.clone())
        };
        match self.store.load(&session_id, &user_id).await {
            Ok(None) => {
                self.held.store(false, Ordering::SeqCst);
                tracing::info!(session_id = %session_id, "Session storage readable again");
                true
            }
            Ok(Some(_)) => {
                self.shadowed.store(true, Ordering::SeqCst);
                tracing::error!(
                    session_id = %session_id,
                    user_id = %user_id,
                    "Found an earlier stored record after an unreadable open, leaving it untouched"
                );
                false
            }
            Err(_) => false,
        }
    }

    fn mark_degraded(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            self.events.emit(EngineEvent::StorageDegraded {
                error: EngineError::StorageUnavailable(reason.to_string()),
            });
        }
    }

    // Caller holds `write_lock`, so no two snapshots are ever written at once.
    async fn write_snapshot(&self) -> FlushOutcome {
        if self.held.load(Ordering::SeqCst) && !self.release_hold().await {
            metrics::record_flush("held");
            self.dirty.store(true, Ordering::SeqCst);
            return FlushOutcome::Failed;
        }

        let written = {
            let mut record = self.record.lock().await;
            self.store.persist(&mut record).await
        };

        if written {
            metrics::record_flush("written");
            if self.degraded.swap(false, Ordering::SeqCst) {
                tracing::info!("Session storage recovered");
                self.events.emit(EngineEvent::StorageRecovered);
            }
            FlushOutcome::Written
        } else {
            metrics::record_flush("failed");
            self.dirty.store(true, Ordering::SeqCst);
            self.mark_degraded("session write failed, keeping edits in memory");
            FlushOutcome::Failed
        }
    }

    /// Debounce and periodic flush loop. Flushes once more on shutdown.
    pub(crate) async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut periodic = interval_at(Instant::now() + self.period, self.period);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut debounce_at: Option<Instant> = None;

        loop {
            let pending = debounce_at;
            let debounce = async move {
                match pending {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.kick.notified() => {
                    debounce_at = Some(Instant::now() + self.debounce);
                }
                _ = debounce => {
                    debounce_at = None;
                    self.flush().await;
                }
                _ = periodic.tick() => {
                    if self.flush().await == FlushOutcome::Written {
                        tracing::debug!("Periodic auto-save flushed pending edits");
                    }
                }
            }
        }

        self.flush_on_exit().await;
    }

    /// Best-effort flush for the unload path.
    pub(crate) async fn flush_on_exit(&self) {
        match self.flush().await {
            FlushOutcome::Failed => {
                tracing::warn!("Pending edits could not be saved before exit");
            }
            FlushOutcome::Written => tracing::debug!("Pending edits saved before exit"),
            FlushOutcome::Clean | FlushOutcome::Closed => {}
        }
    }
}
