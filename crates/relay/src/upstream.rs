use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde_json::Value;
use shared::protocol::ChatCompletionRequest;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamFailure {
    #[error("upstream responded with status {status}")]
    Status { status: u16, detail: Value },
    #[error("upstream request timed out")]
    Timeout,
    #[error("no response from upstream: {0}")]
    NoResponse(String),
    #[error("failed to build upstream request: {0}")]
    Request(String),
}

/// Hosted multimodal model that answers chat-completion requests.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        request: &ChatCompletionRequest,
    ) -> Result<Value, UpstreamFailure>;
}

/// `VisionModel` backed by an OpenAI-compatible HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpVisionModel {
    http: Client,
    endpoint: String,
}

impl HttpVisionModel {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(endpoint, http))
    }

    pub fn with_client(endpoint: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl VisionModel for HttpVisionModel {
    async fn complete(
        &self,
        api_key: &str,
        request: &ChatCompletionRequest,
    ) -> Result<Value, UpstreamFailure> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header(ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(UpstreamFailure::Status {
                status: status.as_u16(),
                detail: error_detail(status, &body),
            });
        }

        response.json::<Value>().await.map_err(|error| {
            if error.is_timeout() {
                UpstreamFailure::Timeout
            } else {
                UpstreamFailure::NoResponse(format!("unreadable upstream response: {error}"))
            }
        })
    }
}

fn classify_send_error(error: reqwest::Error) -> UpstreamFailure {
    if error.is_timeout() {
        UpstreamFailure::Timeout
    } else if error.is_builder() {
        UpstreamFailure::Request(error.to_string())
    } else {
        UpstreamFailure::NoResponse(error.to_string())
    }
}

/// The provider's `detail` field when it sent one, otherwise a generic status line.
pub(crate) fn error_detail(status: StatusCode, body: &[u8]) -> Value {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned())
        .filter(|detail| !detail.is_null())
        .unwrap_or_else(|| {
            Value::String(format!(
                "Request failed with status code {}",
                status.as_u16()
            ))
        })
}

#[cfg(test)]
#[path = "tests/upstream_tests.rs"]
mod tests;
