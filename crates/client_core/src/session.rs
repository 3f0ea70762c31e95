use std::sync::atomic::{AtomicBool, Ordering};

use shared::{domain::ImagePayload, verdict::Verdict};
use tracing::{error, info, warn};

use crate::{DetectClient, SubmitError};

/// What the front end shows once a submission settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    Result(String),
    Error(String),
}

/// One user's analysis flow: at most one request in flight, and every accepted
/// submission ends in exactly one `DisplayState`.
#[derive(Debug)]
pub struct AnalysisSession {
    client: DetectClient,
    in_flight: AtomicBool,
}

impl AnalysisSession {
    pub fn new(client: DetectClient) -> Self {
        Self {
            client,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &DetectClient {
        &self.client
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// `None` means the call was ignored because another one is outstanding.
    pub async fn analyze(&self, image: Option<&ImagePayload>) -> Option<DisplayState> {
        let Some(image) = image else {
            return Some(DisplayState::Error(SubmitError::NoImage.user_message()));
        };
        let _loading = LoadingGuard::acquire(&self.in_flight)?;

        info!(url = %self.client.detect_url(), "sending image to relay");
        let state = match self.client.submit(image).await {
            Ok(verdict) => {
                if let Verdict::Unclear(raw) = &verdict {
                    warn!(%raw, "model answer contained neither yes nor no");
                }
                DisplayState::Result(verdict.display_label())
            }
            Err(error) => {
                error!(%error, connectivity = error.is_connectivity(), "analysis failed");
                DisplayState::Error(error.user_message())
            }
        };
        Some(state)
    }
}

/// Clears the loading flag on drop, including when the future is cancelled.
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
