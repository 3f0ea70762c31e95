use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Decoded-size ceiling applied to images before they are sent upstream.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 180_000;

const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("image data is empty")]
    Empty,
    #[error("image data is not a data URL")]
    NotDataUrl,
    #[error("data URL is not base64 encoded")]
    NotBase64,
    #[error("unsupported media type '{0}'")]
    UnsupportedMediaType(String),
    #[error("image payload is not valid base64")]
    InvalidBase64,
}

/// An encoded still image in data-URL form (`data:<mime>;base64,<payload>`).
///
/// The original string is kept as received; accessors only borrow slices of it,
/// so forwarding an `ImagePayload` never re-encodes the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    data_url: String,
    media_type_end: usize,
    data_start: usize,
}

impl ImagePayload {
    /// Validates a data URL and wraps it without copying the payload.
    pub fn parse(data_url: impl Into<String>) -> Result<Self, PayloadError> {
        let data_url = data_url.into();
        if data_url.trim().is_empty() {
            return Err(PayloadError::Empty);
        }

        let rest = data_url
            .strip_prefix(DATA_URL_PREFIX)
            .ok_or(PayloadError::NotDataUrl)?;
        let (header, data) = rest.split_once(',').ok_or(PayloadError::NotDataUrl)?;
        if !header.to_ascii_lowercase().ends_with(BASE64_MARKER) {
            return Err(PayloadError::NotBase64);
        }

        let media_type = header.split(';').next().unwrap_or_default();
        if !media_type.to_ascii_lowercase().starts_with("image/") {
            return Err(PayloadError::UnsupportedMediaType(media_type.to_string()));
        }
        if data.is_empty() {
            return Err(PayloadError::Empty);
        }
        STANDARD
            .decode(data)
            .map_err(|_| PayloadError::InvalidBase64)?;

        let media_type_end = DATA_URL_PREFIX.len() + media_type.len();
        let data_start = DATA_URL_PREFIX.len() + header.len() + 1;
        Ok(Self {
            data_url,
            media_type_end,
            data_start,
        })
    }

    /// Encodes raw image bytes into a data URL.
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Result<Self, PayloadError> {
        let data_url = format!(
            "{DATA_URL_PREFIX}{media_type}{BASE64_MARKER},{}",
            STANDARD.encode(bytes)
        );
        Self::parse(data_url)
    }

    pub fn as_str(&self) -> &str {
        &self.data_url
    }

    pub fn into_string(self) -> String {
        self.data_url
    }

    pub fn media_type(&self) -> &str {
        &self.data_url[DATA_URL_PREFIX.len()..self.media_type_end]
    }

    pub fn base64_data(&self) -> &str {
        &self.data_url[self.data_start..]
    }

    pub fn decoded_len(&self) -> usize {
        estimated_decoded_len(&self.data_url)
    }

    pub fn decode(&self) -> Result<Vec<u8>, PayloadError> {
        STANDARD
            .decode(self.base64_data())
            .map_err(|_| PayloadError::InvalidBase64)
    }
}

/// Byte length the base64 part of a data URL decodes to, computed from its text
/// length alone. Everything before the first comma is ignored; a string without
/// a comma has no payload and estimates to zero.
pub fn estimated_decoded_len(data_url: &str) -> usize {
    let Some((_, data)) = data_url.split_once(',') else {
        return 0;
    };
    let data = data.trim_end();
    let padding = data.bytes().rev().take_while(|b| *b == b'=').take(2).count();
    (data.len() * 3 / 4).saturating_sub(padding)
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
