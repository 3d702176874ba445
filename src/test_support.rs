use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::schemas::session::{
    AnswerValue, Confirmation, Item, RegistrationStatus, SessionDescriptor,
};
use crate::services::session_backend::{BackendError, SessionBackend};

const ENGINE_ENV_KEYS: &[&str] = &[
    "SESSION_API_BASE_URL",
    "SESSION_API_TOKEN",
    "SESSION_REQUEST_TIMEOUT_SECONDS",
    "SESSION_STORE_DIR",
    "TICK_INTERVAL_MS",
    "AUTO_SAVE_DEBOUNCE_MS",
    "AUTO_SAVE_INTERVAL_SECONDS",
    "WARNING_THRESHOLDS",
    "REVEAL_UNLOCK_SECONDS",
    "SUBMIT_MAX_ATTEMPTS",
    "SUBMIT_BACKOFF_BASE_MS",
    "SUBMIT_GRACE_PERIOD_SECONDS",
    "ANSWER_MAX_ATTEMPTS",
    "SESSION_ID",
    "SESSION_USER_ID",
];

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("PICRETE_ENV", "test");
    std::env::set_var("PICRETE_STRICT_CONFIG", "0");
    std::env::set_var("SESSION_STORE_BACKEND", "memory");
    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "6379");
    std::env::set_var("REDIS_DB", "1");
    std::env::remove_var("REDIS_PASSWORD");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for key in ENGINE_ENV_KEYS {
        std::env::remove_var(key);
    }
}

pub(crate) fn descriptor(duration_seconds: i64, items: &[&str]) -> SessionDescriptor {
    SessionDescriptor {
        session_id: "s-1".to_string(),
        user_id: "u-1".to_string(),
        start_time: None,
        end_time: None,
        duration_seconds: Some(duration_seconds),
        items: items.iter().map(|id| Item::new(*id)).collect(),
    }
}

/// Scriptable in-process backend. Counts calls and fails on request.
pub(crate) struct FakeSessionBackend {
    registration: StdMutex<RegistrationStatus>,
    registration_down: AtomicBool,
    delay: StdMutex<Duration>,
    answer_failures: AtomicU32,
    submit_failures: AtomicU32,
    answer_calls: AtomicU32,
    submit_calls: AtomicU32,
    submit_keys: StdMutex<Vec<String>>,
}

impl FakeSessionBackend {
    pub(crate) fn new() -> Self {
        Self {
            registration: StdMutex::new(RegistrationStatus::Active),
            registration_down: AtomicBool::new(false),
            delay: StdMutex::new(Duration::ZERO),
            answer_failures: AtomicU32::new(0),
            submit_failures: AtomicU32::new(0),
            answer_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            submit_keys: StdMutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_registration(&self, status: RegistrationStatus) {
        *self.registration.lock().expect("registration lock") = status;
    }

    pub(crate) fn set_registration_unavailable(&self, down: bool) {
        self.registration_down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = delay;
    }

    pub(crate) fn fail_next_answers(&self, count: u32) {
        self.answer_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_submits(&self, count: u32) {
        self.submit_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn answer_calls(&self) -> u32 {
        self.answer_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn submit_keys(&self) -> Vec<String> {
        self.submit_keys.lock().expect("keys lock").clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SessionBackend for FakeSessionBackend {
    async fn fetch_descriptor(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionDescriptor, BackendError> {
        let mut descriptor = descriptor(600, &["q1", "q2", "q3"]);
        descriptor.session_id = session_id.to_string();
        descriptor.user_id = user_id.to_string();
        Ok(descriptor)
    }

    async fn registration_status(
        &self,
        _session_id: &str,
        _user_id: &str,
    ) -> Result<RegistrationStatus, BackendError> {
        if self.registration_down.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(*self.registration.lock().expect("registration lock"))
    }

    async fn submit_answer(
        &self,
        _session_id: &str,
        _user_id: &str,
        _item_id: &str,
        _value: &AnswerValue,
    ) -> Result<Confirmation, BackendError> {
        self.answer_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if Self::take_failure(&self.answer_failures) {
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        Ok(Confirmation { is_correct: Some(true), score: Some(1.0) })
    }

    async fn mark_submitted(
        &self,
        _session_id: &str,
        _user_id: &str,
        idempotency_key: &str,
    ) -> Result<(), BackendError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submit_keys.lock().expect("keys lock").push(idempotency_key.to_string());
        self.pause().await;
        if Self::take_failure(&self.submit_failures) {
            return Err(BackendError::Status { status: 503, detail: "unavailable".to_string() });
        }
        Ok(())
    }
}
