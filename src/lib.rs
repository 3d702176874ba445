pub(crate) mod core;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;

pub use crate::core::errors::EngineError;
pub use crate::core::time::{Clock, ManualClock, SharedClock, SystemClock};
pub use crate::repositories::backends::{FileBackend, MemoryBackend, StorageBackend, StoreError};
pub use crate::repositories::session_store::PersistentSessionStore;
pub use crate::schemas::session::{
    AnswerValue, Confirmation, ConfirmedAnswer, DeadlineState, Item, ItemId, ItemStatus,
    PersistedSession, RegistrationStatus, SessionDescriptor, SessionPatch, WarningId,
};
pub use crate::services::autosave::FlushOutcome;
pub use crate::services::deadline_clock::{compute_deadline, DeadlineClock};
pub use crate::services::events::EngineEvent;
pub use crate::services::reveal_gate::RevealGate;
pub use crate::services::session_backend::{
    BackendError, HttpSessionBackend, RetryPolicy, SessionBackend,
};
pub use crate::services::session_engine::{EngineConfig, EngineDeps, SessionEngine};
pub use crate::services::submission_coordinator::{SubmissionState, SubmitOutcome, SubmitTrigger};
pub use crate::services::threshold_notifier::{Threshold, ThresholdNotifier};
pub use crate::tasks::scheduler::RuntimeHandle;

use crate::core::config::{ConfigError, Settings, StoreBackendKind};
use crate::core::redis::RedisHandle;
use crate::core::shutdown::shutdown_signal;
use crate::core::telemetry;
use crate::repositories::backends::RedisBackend;

/// Runs one session attempt headless until it is submitted or the process is
/// asked to stop.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let session_id =
        settings.runner().session_id.clone().ok_or(ConfigError::Missing("SESSION_ID"))?;
    let user_id =
        settings.runner().user_id.clone().ok_or(ConfigError::Missing("SESSION_USER_ID"))?;

    let (storage, redis) = build_storage(&settings).await?;
    let backend = HttpSessionBackend::from_settings(&settings)?;
    let deps = EngineDeps {
        backend: Arc::new(backend),
        storage,
        clock: Arc::new(SystemClock),
    };

    let engine =
        SessionEngine::open_remote(EngineConfig::from_settings(&settings), deps, &session_id, &user_id)
            .await
            .context("Failed to open session")?;

    tracing::info!(
        session_id = %session_id,
        user_id = %user_id,
        environment = %settings.runtime().environment.as_str(),
        store = settings.store().backend.as_str(),
        remaining_seconds = engine.remaining_seconds(),
        "Session engine running"
    );

    let mut events = engine.subscribe();
    let runtime = engine.start();

    if !engine.submission_state().is_submitted() {
        tokio::select! {
            reason = shutdown_signal() => {
                tracing::info!(reason = reason.as_str(), "Stopping session engine");
            }
            _ = follow_events(&mut events) => {}
        }
    }

    runtime.stop().await;

    if let Some(redis) = redis {
        redis.disconnect().await;
        tracing::info!("Redis disconnected");
    }
    if let Some(rendered) = core::metrics::render() {
        tracing::debug!(metrics = %rendered, "Final metrics snapshot");
    }

    Ok(())
}

async fn build_storage(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn StorageBackend>, Option<RedisHandle>)> {
    match settings.store().backend {
        StoreBackendKind::File => {
            let dir = settings.store().dir.clone();
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create session store directory {dir}"))?;
            Ok((Arc::new(FileBackend::new(dir)), None))
        }
        StoreBackendKind::Redis => {
            let redis = RedisHandle::new(settings.redis().redis_url());
            if let Err(err) = redis.connect().await {
                tracing::error!(error = %err, "Failed to connect to Redis; session edits stay in memory");
            } else {
                tracing::info!(health = ?redis.health().await, "Redis connected successfully");
            }
            Ok((Arc::new(RedisBackend::new(redis.clone())), Some(redis)))
        }
        StoreBackendKind::Memory => {
            tracing::warn!("Memory session store selected; progress will not survive a restart");
            Ok((Arc::new(MemoryBackend::new()), None))
        }
    }
}

/// Logs engine events until the session reaches its terminal state.
async fn follow_events(events: &mut tokio::sync::broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Tick { .. }) => {}
            Ok(EngineEvent::Submitted { at_epoch_ms }) => {
                tracing::info!(at_epoch_ms, "Session submitted, exiting");
                return;
            }
            Ok(event) => tracing::info!(?event, "Session event"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event listener lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
