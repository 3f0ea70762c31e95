use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response header carrying the relay's reading of the model answer.
pub const VERDICT_HEADER: &str = "x-detect-verdict";

pub fn detect_route() -> &'static str {
    "/api/detect"
}

pub fn health_route() -> &'static str {
    "/healthz"
}

/// Body of `POST /api/detect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectRequest {
    #[serde(
        rename = "imageBase64",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub image_base64: Option<String>,
}

impl DetectRequest {
    pub fn new(image_base64: impl Into<String>) -> Self {
        Self {
            image_base64: Some(image_base64.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat-completion request sent to the hosted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ChoiceMessage,
}

/// Chat-completion response as far as the detector reads it. Every other field
/// the provider sends is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletion {
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}
