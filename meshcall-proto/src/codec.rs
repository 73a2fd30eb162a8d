//! JSON encoding for signaling events.
//!
//! Frames are text: one JSON object per WebSocket message. Decoding is
//! strict about the event name and the documented payload fields, so an
//! unknown or malformed event surfaces as a [`CodecError`] the caller can log
//! and ignore.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::signal::{ClientEvent, ServerEvent};

/// Default upper bound for a single signaling frame (64 KB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the rejected frame.
        size: usize,
        /// Limit in effect.
        max: usize,
    },
    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

fn decode<T: DeserializeOwned>(text: &str, max: usize) -> Result<T, CodecError> {
    if text.len() > max {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            max,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Encodes a [`ClientEvent`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Encodes a [`ServerEvent`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decodes a [`ClientEvent`] from a text frame no larger than `max` bytes.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] for oversized frames and
/// [`CodecError::Serialization`] for unknown events or malformed payloads.
pub fn decode_client(text: &str, max: usize) -> Result<ClientEvent, CodecError> {
    decode(text, max)
}

/// Decodes a [`ServerEvent`] from a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] for unknown events or malformed
/// payloads.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    decode(text, usize::MAX)
}

/// Interprets a binary frame as UTF-8 JSON text.
///
/// # Errors
///
/// Returns [`CodecError::InvalidUtf8`] if the bytes are not UTF-8.
pub fn text_from_bytes(bytes: &[u8]) -> Result<&str, CodecError> {
    std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
}
