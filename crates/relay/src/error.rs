use serde_json::Value;
use shared::{
    domain::PayloadError,
    error::{ErrorBody, ErrorCode},
};
use thiserror::Error;

use crate::upstream::UpstreamFailure;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Server configuration error: API key missing.")]
    MissingCredential,
    #[error("Missing imageBase64 data in request.")]
    MissingImage,
    #[error("Invalid image data: {0}.")]
    InvalidImage(#[from] PayloadError),
    #[error("Image file size is too large (max ~{}KB).", .limit / 1000)]
    PayloadTooLarge { estimated: usize, limit: usize },
    #[error("Failed to get response from upstream model API.")]
    Upstream { status: u16, detail: Value },
    #[error("Upstream model API did not answer in time.")]
    UpstreamTimeout,
    #[error("No response received from upstream API.")]
    UpstreamUnavailable(String),
    #[error("Internal server error setting up API request.")]
    Internal(String),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingCredential => ErrorCode::Configuration,
            Self::MissingImage | Self::InvalidImage(_) => ErrorCode::InvalidInput,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::Upstream { .. } => ErrorCode::Upstream,
            Self::UpstreamTimeout => ErrorCode::UpstreamTimeout,
            Self::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// HTTP status the relay answers with.
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingCredential | Self::Internal(_) => 500,
            Self::MissingImage | Self::InvalidImage(_) => 400,
            Self::PayloadTooLarge { .. } => 413,
            Self::Upstream { status, .. } => *status,
            Self::UpstreamTimeout | Self::UpstreamUnavailable(_) => 502,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let body = ErrorBody::new(self.code(), self.to_string());
        match self {
            Self::Upstream { detail, .. } => body.with_detail(detail.clone()),
            _ => body,
        }
    }

    /// True for failures rejected before anything is sent upstream.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential
                | Self::MissingImage
                | Self::InvalidImage(_)
                | Self::PayloadTooLarge { .. }
        )
    }
}

impl From<UpstreamFailure> for RelayError {
    fn from(value: UpstreamFailure) -> Self {
        match value {
            UpstreamFailure::Status { status, detail } => Self::Upstream { status, detail },
            UpstreamFailure::Timeout => Self::UpstreamTimeout,
            UpstreamFailure::NoResponse(reason) => Self::UpstreamUnavailable(reason),
            UpstreamFailure::Request(reason) => Self::Internal(reason),
        }
    }
}
