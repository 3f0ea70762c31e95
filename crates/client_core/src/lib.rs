use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::ImagePayload,
    error::ErrorBody,
    protocol::{detect_route, ChatCompletion, DetectRequest},
    verdict::Verdict,
};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub mod selection;
pub mod session;

pub use selection::{select_image, SelectedImage, SelectionError};
pub use session::{AnalysisSession, DisplayState};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3001";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no image selected")]
    NoImage,
    #[error("relay answered with status {status}")]
    Rejected {
        status: u16,
        body: Option<ErrorBody>,
    },
    #[error("relay reported an error: {}", .0.error)]
    Backend(ErrorBody),
    #[error("unexpected response format")]
    UnexpectedResponse,
    #[error("relay unreachable: {0}")]
    Unreachable(String),
    #[error("request setup failed: {0}")]
    Setup(String),
}

impl SubmitError {
    fn from_transport(error: reqwest::Error) -> Self {
        if error.is_builder() {
            Self::Setup(error.to_string())
        } else {
            Self::Unreachable(error.to_string())
        }
    }

    /// True when the failure is about reaching a service rather than the input.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Rejected { status, .. } => matches!(status, 502 | 504),
            _ => false,
        }
    }

    /// One human-readable line for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoImage => "Please select an image first.".to_string(),
            Self::Rejected { status: 413, .. } => {
                "The uploaded image is too large. Please try a smaller file.".to_string()
            }
            Self::Rejected { status, body } if matches!(status, 502 | 504) => format!(
                "The analysis server could not reach the model provider (Status {status}): {}. Please try again later.",
                rejection_reason(body.as_ref(), "Bad gateway")
            ),
            Self::Rejected { status, body } => format!(
                "Analysis failed (Status {status}): {}.",
                rejection_reason(body.as_ref(), "Server error")
            ),
            Self::Backend(body) => format!(
                "Backend Error: {} {}",
                body.error,
                body.detail_text().unwrap_or_default()
            )
            .trim_end()
            .to_string(),
            Self::UnexpectedResponse => {
                "Received an unexpected response format from the server.".to_string()
            }
            Self::Unreachable(_) => "Could not connect to the analysis server. Please check your connection or try again later.".to_string(),
            Self::Setup(reason) => format!("An unexpected error occurred: {reason}"),
        }
    }
}

fn rejection_reason(body: Option<&ErrorBody>, fallback: &str) -> String {
    body.and_then(|body| {
        Some(body.error.trim())
            .filter(|error| !error.is_empty())
            .map(str::to_string)
            .or_else(|| body.detail_text())
    })
    .map(|reason| reason.trim_end_matches('.').to_string())
    .unwrap_or_else(|| fallback.to_string())
}

/// HTTP client for the relay's detect endpoint.
#[derive(Debug, Clone)]
pub struct DetectClient {
    http: Client,
    detect_url: Url,
}

impl DetectClient {
    pub fn new(server_url: &str) -> Result<Self, SubmitError> {
        Self::with_timeout(server_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(server_url: &str, timeout: Duration) -> Result<Self, SubmitError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SubmitError::Setup(error.to_string()))?;
        Self::with_http(server_url, http)
    }

    pub fn with_http(server_url: &str, http: Client) -> Result<Self, SubmitError> {
        let detect_url = Url::parse(server_url)
            .and_then(|base| base.join(detect_route()))
            .map_err(|error| SubmitError::Setup(format!("invalid server url '{server_url}': {error}")))?;
        Ok(Self { http, detect_url })
    }

    pub fn detect_url(&self) -> &Url {
        &self.detect_url
    }

    /// Sends one image and reads the model's answer. Never retried.
    pub async fn submit(&self, image: &ImagePayload) -> Result<Verdict, SubmitError> {
        let response = self
            .http
            .post(self.detect_url.clone())
            .json(&DetectRequest::new(image.as_str()))
            .send()
            .await
            .map_err(SubmitError::from_transport)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(SubmitError::from_transport)?;
        debug!(status = status.as_u16(), bytes = body.len(), "relay responded");

        if !status.is_success() {
            return Err(SubmitError::Rejected {
                status: status.as_u16(),
                body: serde_json::from_slice::<ErrorBody>(&body).ok(),
            });
        }

        let value = serde_json::from_slice::<Value>(&body)
            .map_err(|_| SubmitError::UnexpectedResponse)?;
        interpret_response(&value)
    }
}

/// Reads a successful relay body: a completion with at least one choice, or an
/// error object the relay chose to send with a success status.
pub fn interpret_response(value: &Value) -> Result<Verdict, SubmitError> {
    let has_choices = value
        .get("choices")
        .and_then(Value::as_array)
        .is_some_and(|choices| !choices.is_empty());
    if has_choices {
        let completion =
            ChatCompletion::deserialize(value).map_err(|_| SubmitError::UnexpectedResponse)?;
        return Verdict::from_completion(&completion).ok_or(SubmitError::UnexpectedResponse);
    }

    if value.get("error").is_some() {
        if let Ok(body) = ErrorBody::deserialize(value) {
            return Err(SubmitError::Backend(body));
        }
    }
    Err(SubmitError::UnexpectedResponse)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
