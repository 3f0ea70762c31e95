use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{estimated_decoded_len, ImagePayload, DEFAULT_MAX_IMAGE_BYTES},
    protocol::{ChatCompletion, ChatCompletionRequest, ChatMessage, DetectRequest},
    verdict::Verdict,
};

pub mod error;
pub mod observer;
pub mod upstream;

pub use error::RelayError;
pub use observer::{NoopObserver, RelayObserver, TracingObserver};
pub use upstream::{HttpVisionModel, UpstreamFailure, VisionModel};

pub const DEFAULT_UPSTREAM_URL: &str = "https://integrate.api.nvidia.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "nvidia/neva-22b";
pub const DEFAULT_PROMPT: &str =
    "Is this blood sample image indicative of malaria? Respond with only 'Yes' or 'No'.";
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Sampling settings sent with every upstream request. Kept low so the model
/// answers with a short, stable token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            temperature: 0.2,
            top_p: 0.7,
        }
    }
}

/// Everything the relay needs, built once at startup and injected.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: Option<String>,
    pub upstream_url: String,
    pub model: String,
    pub prompt: String,
    pub max_image_bytes: usize,
    pub upstream_timeout: Duration,
    pub generation: GenerationSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            upstream_url: DEFAULT_UPSTREAM_URL.into(),
            model: DEFAULT_MODEL.into(),
            prompt: DEFAULT_PROMPT.into(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            generation: GenerationSettings::default(),
        }
    }
}

impl RelayConfig {
    /// The API key, treating a blank value as unset.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Successful classification: the upstream body exactly as received, plus the
/// relay's reading of its first answer.
#[derive(Debug, Clone)]
pub struct Classification {
    pub completion: Value,
    pub verdict: Option<Verdict>,
}

/// Validates detect requests and forwards them to the hosted model. Holds no
/// per-request state; clones share the same configuration and model.
#[derive(Clone)]
pub struct RelayService {
    config: Arc<RelayConfig>,
    model: Arc<dyn VisionModel>,
    observer: Arc<dyn RelayObserver>,
}

impl RelayService {
    pub fn new(config: RelayConfig, model: Arc<dyn VisionModel>) -> Self {
        Self {
            config: Arc::new(config),
            model,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RelayObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Single attempt per request; failures are never retried.
    pub async fn classify(&self, request: DetectRequest) -> Result<Classification, RelayError> {
        let (api_key, image) = match validate_request(&self.config, request) {
            Ok(validated) => validated,
            Err(error) => {
                self.observer.rejected(&error);
                return Err(error);
            }
        };

        self.observer
            .forwarding(&self.config.model, image.decoded_len());
        let completion_request = build_completion_request(&self.config, &image);

        let started = Instant::now();
        match self.model.complete(api_key, &completion_request).await {
            Ok(completion) => {
                let verdict = ChatCompletion::deserialize(&completion)
                    .ok()
                    .and_then(|parsed| Verdict::from_completion(&parsed));
                self.observer.completed(verdict.as_ref(), started.elapsed());
                Ok(Classification {
                    completion,
                    verdict,
                })
            }
            Err(failure) => {
                let error = RelayError::from(failure);
                self.observer.upstream_failed(&error, started.elapsed());
                Err(error)
            }
        }
    }
}

/// Pre-flight checks, in order: credential, presence, size, then well-formedness.
/// Nothing here touches the network.
pub fn validate_request(
    config: &RelayConfig,
    request: DetectRequest,
) -> Result<(&str, ImagePayload), RelayError> {
    let api_key = config.credential().ok_or(RelayError::MissingCredential)?;

    let data_url = request
        .image_base64
        .filter(|value| !value.is_empty())
        .ok_or(RelayError::MissingImage)?;

    let estimated = estimated_decoded_len(&data_url);
    if estimated > config.max_image_bytes {
        return Err(RelayError::PayloadTooLarge {
            estimated,
            limit: config.max_image_bytes,
        });
    }

    let image = ImagePayload::parse(data_url)?;
    Ok((api_key, image))
}

/// One user message carrying the question and the image inline, unmodified.
pub fn build_completion_request(
    config: &RelayConfig,
    image: &ImagePayload,
) -> ChatCompletionRequest {
    let content = format!("{} <img src=\"{}\" />", config.prompt, image.as_str());
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: vec![ChatMessage::user(content)],
        max_tokens: config.generation.max_tokens,
        temperature: config.generation.temperature,
        top_p: config.generation.top_p,
        stream: false,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
