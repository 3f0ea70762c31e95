use std::time::Duration;

use shared::verdict::Verdict;
use tracing::{error, info, warn};

use crate::error::RelayError;

/// Hooks the relay calls at each stage of a classification. All methods default
/// to doing nothing so implementations only override what they record.
pub trait RelayObserver: Send + Sync {
    fn rejected(&self, _error: &RelayError) {}

    fn forwarding(&self, _model: &str, _image_bytes: usize) {}

    fn completed(&self, _verdict: Option<&Verdict>, _elapsed: Duration) {}

    fn upstream_failed(&self, _error: &RelayError, _elapsed: Duration) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RelayObserver for NoopObserver {}

/// Structured `tracing` output for each stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RelayObserver for TracingObserver {
    fn rejected(&self, error: &RelayError) {
        match error {
            RelayError::MissingCredential => error!("API key is missing on the server"),
            RelayError::PayloadTooLarge { estimated, limit } => {
                warn!(estimated, limit, "image too large, rejecting before upstream call")
            }
            other => info!(code = ?other.code(), %other, "rejected detect request"),
        }
    }

    fn forwarding(&self, model: &str, image_bytes: usize) {
        info!(model, image_bytes, "forwarding detect request upstream");
    }

    fn completed(&self, verdict: Option<&Verdict>, elapsed: Duration) {
        match verdict {
            Some(verdict) => info!(
                verdict = verdict.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "received upstream response"
            ),
            None => warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "upstream response carried no answer text"
            ),
        }
    }

    fn upstream_failed(&self, failure: &RelayError, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match failure {
            RelayError::Upstream { status, detail } => {
                error!(status, %detail, elapsed_ms, "upstream returned an error status")
            }
            RelayError::UpstreamUnavailable(reason) => {
                error!(%reason, elapsed_ms, "no response received from upstream")
            }
            RelayError::Internal(reason) => {
                error!(%reason, "failed to set up upstream request")
            }
            other => error!(%other, elapsed_ms, "upstream call failed"),
        }
    }
}
