use std::path::{Path, PathBuf};

use shared::domain::{ImagePayload, PayloadError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("'{}' is not a supported image file", .0.display())]
    NotAnImage(PathBuf),
    #[error("failed to read '{}': {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image could not be encoded: {0}")]
    Encoding(#[from] PayloadError),
}

impl SelectionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotAnImage(_) => "Please select a valid image file (e.g., PNG, JPG).",
            Self::Unreadable { .. } | Self::Encoding(_) => {
                "Failed to read the image file. Please try again."
            }
        }
    }
}

/// A file the user picked, encoded and ready to submit.
#[derive(Debug, Clone)]
pub struct SelectedImage {
    pub file_name: String,
    pub payload: ImagePayload,
}

/// Media type for the picker's accepted formats, judged by extension.
pub fn media_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub async fn select_image(path: impl AsRef<Path>) -> Result<SelectedImage, SelectionError> {
    let path = path.as_ref();
    let media_type =
        media_type_for(path).ok_or_else(|| SelectionError::NotAnImage(path.to_path_buf()))?;

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| SelectionError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
    let payload = ImagePayload::from_bytes(media_type, &bytes)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(SelectedImage { file_name, payload })
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
