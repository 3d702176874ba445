use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::services::session_engine::SessionEngine;

/// Background loops of one running engine. Dropping the handle signals the
/// loops to stop; [`RuntimeHandle::stop`] also waits for them.
pub struct RuntimeHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    pub async fn stop(mut self) {
        if self.shutdown_tx.send(true).is_err() {
            tracing::debug!("Engine loops already stopped");
        }
        for handle in std::mem::take(&mut self.handles) {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Engine task join failed");
            }
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub(crate) fn spawn(engine: Arc<SessionEngine>) -> RuntimeHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = vec![
        tokio::spawn(countdown_loop(engine.clone(), shutdown_rx.clone())),
        tokio::spawn(engine.autosave().clone().run(shutdown_rx)),
    ];

    RuntimeHandle { shutdown_tx, handles }
}

async fn countdown_loop(engine: Arc<SessionEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut ticking = engine.watch_ticking();
    let mut tick = interval(engine.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() || engine.submission_state().is_submitted() {
            break;
        }

        if !*ticking.borrow_and_update() {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = ticking.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    tick.reset();
                }
            }
            continue;
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                engine.on_tick().await;
            }
            changed = ticking.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(session_id = %engine.descriptor().session_id, "Countdown loop stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::time::ManualClock;
    use crate::repositories::backends::MemoryBackend;
    use crate::services::events::EngineEvent;
    use crate::services::session_engine::{EngineConfig, EngineDeps};
    use crate::test_support::{descriptor, FakeSessionBackend};

    #[tokio::test(start_paused = true)]
    async fn loops_tick_and_stop_on_request() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = Arc::new(FakeSessionBackend::new());
        let storage = Arc::new(MemoryBackend::new());
        let deps = EngineDeps { backend: backend.clone(), storage: storage.clone(), clock };
        let engine = SessionEngine::open(EngineConfig::default(), deps, descriptor(600, &["q1"]))
            .await
            .expect("engine");
        let mut events = engine.subscribe();

        let runtime = engine.start();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let mut ticks = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::Tick { .. }) {
                ticks += 1;
            }
        }
        assert_eq!(ticks, 3);

        runtime.stop().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_submits_at_deadline_and_exits() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = Arc::new(FakeSessionBackend::new());
        let deps = EngineDeps {
            backend: backend.clone(),
            storage: Arc::new(MemoryBackend::new()),
            clock: clock.clone(),
        };
        let engine = SessionEngine::open(EngineConfig::default(), deps, descriptor(600, &["q1"]))
            .await
            .expect("engine");

        let runtime = engine.start();
        clock.set(600_000);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(engine.submission_state().is_submitted());
        assert_eq!(backend.submit_calls(), 1);
        runtime.stop().await;
    }
}
