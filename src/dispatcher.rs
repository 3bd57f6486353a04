use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Longest slice of a failing response body kept in `last_error`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Webhook responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Webhook timed out after {0:?}")]
    Timeout(Duration),

    #[error("Webhook request failed: {0}")]
    Transport(String),

    #[error("No webhook URL configured for job")]
    NoTarget,
}

/// Delivers a payload to a webhook. Implementations hold no per-job state.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// POST `payload` to `url`. Any 2xx is success.
    async fn send(&self, url: &str, payload: &Value, timeout: Duration)
        -> Result<(), DispatchError>;
}

/// [`Dispatcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("webhook-scheduler/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, url: &str, payload: &Value) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(describe(&e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }

        Err(DispatchError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(
        &self,
        url: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        tokio::select! {
            res = self.post(url, payload) => res,
            _ = tokio::time::sleep(timeout) => Err(DispatchError::Timeout(timeout)),
        }
    }
}

/// `reqwest` hides the useful part of connection errors in the source chain.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
