use serde::{Deserialize, Serialize};

use crate::protocol::ChatCompletion;

const AFFIRMATIVE: &str = "yes";
const NEGATIVE: &str = "no";

/// Label derived from the model's free-text answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "raw", rename_all = "snake_case")]
pub enum Verdict {
    Positive,
    Negative,
    Unclear(String),
}

impl Verdict {
    /// Case-insensitive substring match on the trimmed answer. The affirmative
    /// token wins when both appear; text with neither is kept verbatim.
    pub fn from_model_text(text: &str) -> Self {
        let trimmed = text.trim();
        let lowered = trimmed.to_lowercase();
        if lowered.contains(AFFIRMATIVE) {
            Self::Positive
        } else if lowered.contains(NEGATIVE) {
            Self::Negative
        } else {
            Self::Unclear(trimmed.to_string())
        }
    }

    pub fn from_completion(completion: &ChatCompletion) -> Option<Self> {
        completion.first_content().map(Self::from_model_text)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Unclear(_) => "unclear",
        }
    }

    pub fn display_label(&self) -> String {
        match self {
            Self::Positive => "Malaria Detected: Yes".to_string(),
            Self::Negative => "Malaria Detected: No".to_string(),
            Self::Unclear(raw) => format!("Analysis complete. Response: {raw}"),
        }
    }
}

#[cfg(test)]
#[path = "tests/verdict_tests.rs"]
mod tests;
