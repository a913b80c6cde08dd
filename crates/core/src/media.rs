//! Media payload handling for job inputs and outputs.
//!
//! Job inputs arrive either as an `http(s)` URL or as inline base64,
//! optionally wrapped in a `data:<mime>;base64,` URI. The generated video
//! goes back out as a data URI.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CoreError;

/// Where a job input's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Remote file to download.
    Url(String),
    /// Base64 payload, possibly carrying a data URI prefix.
    Inline(String),
}

impl MediaSource {
    /// Classify a raw input value. Anything starting with `http` is a URL.
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http") {
            Self::Url(value.to_string())
        } else {
            Self::Inline(value.to_string())
        }
    }

    /// Short description for logs (never the payload itself).
    pub fn describe(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Inline(data) => format!("<inline {} bytes>", data.len()),
        }
    }
}

/// Decode an inline payload.
///
/// Everything up to and including the first `,` is treated as a data URI
/// prefix and discarded. ASCII whitespace (line wrapping) is ignored.
pub fn decode_inline(data: &str) -> Result<Vec<u8>, CoreError> {
    let payload = match data.split_once(',') {
        Some((_, rest)) => rest,
        None => data,
    };

    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    STANDARD
        .decode(compact)
        .map_err(|e| CoreError::InvalidMedia(format!("base64 decode failed: {e}")))
}

/// Encode bytes as a `data:` URI.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// MIME type for a generated video, derived from its extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
