use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::core::config::Settings;
use crate::schemas::session::{AnswerValue, Confirmation, RegistrationStatus, SessionDescriptor};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid backend response: {0}")]
    Decode(String),
}

/// Remote endpoints the engine depends on.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn fetch_descriptor(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionDescriptor, BackendError>;

    async fn registration_status(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<RegistrationStatus, BackendError>;

    async fn submit_answer(
        &self,
        session_id: &str,
        user_id: &str,
        item_id: &str,
        value: &AnswerValue,
    ) -> Result<Confirmation, BackendError>;

    /// Must succeed when the session is already marked submitted.
    async fn mark_submitted(
        &self,
        session_id: &str,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Exponential backoff with up to 20% jitter, capped at 30 seconds.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.backoff_base.saturating_mul(2_u32.pow(exponent)).min(MAX_BACKOFF);
        let jitter_ms = (base.as_millis() as u64) / 5;
        if jitter_ms == 0 {
            return base;
        }
        (base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))).min(MAX_BACKOFF)
    }
}

/// Bounds a remote call. Elapsed time is reported as [`BackendError::Timeout`].
pub(crate) async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(timeout)),
    }
}

/// Runs `call` up to `policy.max_attempts` times with backoff between attempts.
/// Returns the last error together with the number of attempts made.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, (BackendError, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match with_timeout(policy.timeout, call()).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_attempts || !err.is_transient() => {
                return Err((err, attempt));
            }
            Err(err) => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(operation, attempt, error = %err, ?backoff, "Remote call failed, retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

impl BackendError {
    /// Client errors (4xx other than 408/429) are not worth repeating.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Decode(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    status: RegistrationStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: Option<String>,
}

/// JSON-over-HTTP implementation of [`SessionBackend`].
#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpSessionBackend {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.api().request_timeout_seconds);
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build()
            .context("Failed to build session backend HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.api().base_url.trim_end_matches('/').to_string(),
            token: settings.api().token.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }
        response.json::<T>().await.map_err(|err| BackendError::Decode(err.to_string()))
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> BackendError {
    let raw = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&raw)
        .ok()
        .and_then(|body| body.detail)
        .unwrap_or(raw);
    BackendError::Status { status: status.as_u16(), detail }
}

fn transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(Duration::ZERO)
    } else {
        BackendError::Transport(err.to_string())
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn fetch_descriptor(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionDescriptor, BackendError> {
        let url = format!("{}/sessions/{session_id}", self.base_url);
        let response = self
            .authorize(self.client.get(&url).query(&[("user_id", user_id)]))
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }

    async fn registration_status(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<RegistrationStatus, BackendError> {
        let url = format!("{}/sessions/{session_id}/registration", self.base_url);
        let response = self
            .authorize(self.client.get(&url).query(&[("user_id", user_id)]))
            .send()
            .await
            .map_err(transport)?;
        Ok(Self::decode::<RegistrationResponse>(response).await?.status)
    }

    async fn submit_answer(
        &self,
        session_id: &str,
        user_id: &str,
        item_id: &str,
        value: &AnswerValue,
    ) -> Result<Confirmation, BackendError> {
        let url = format!("{}/sessions/{session_id}/answers", self.base_url);
        let body = json!({ "user_id": user_id, "item_id": item_id, "value": value });
        let response =
            self.authorize(self.client.post(&url).json(&body)).send().await.map_err(transport)?;
        Self::decode(response).await
    }

    async fn mark_submitted(
        &self,
        session_id: &str,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<(), BackendError> {
        let url = format!("{}/sessions/{session_id}/submit", self.base_url);
        let response = self
            .authorize(
                self.client
                    .post(&url)
                    .header("Idempotency-Key", idempotency_key)
                    .json(&json!({ "user_id": user_id })),
            )
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            // 409 means an earlier attempt already landed.
            return Ok(());
        }
        Err(status_error(status, response).await)
    }
}
