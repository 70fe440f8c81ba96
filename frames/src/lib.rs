//! Shared frame model and JSON codec for the session wire protocol.
//!
//! This crate owns the wire representation used by the session layer and the
//! CLI. Payloads stay flexible (`serde_json::Value`); envelopes are plain JSON
//! text frames.
//!
//! WIRE SHAPES
//! ===========
//! - Outbound (request or fire-and-forget): `{route, data, index}`.
//! - Inbound, discriminated by `method`:
//!   - `response`: `{route, index, status, errmsg?, data?}`
//!   - `emit`: `{type, status?, errmsg?, data?}`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error returned by the inbound decoders.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not valid JSON or lacks a required envelope field.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
    /// A binary frame did not carry UTF-8 text.
    #[error("frame is not valid utf-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
}

/// A client-to-server frame. Correlated requests and fire-and-forget sends
/// share this shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Logical endpoint name, e.g. `"player/login"`.
    pub route: String,
    /// Request payload. Always an object on the wire.
    pub data: Value,
    /// Sequence index used to correlate the response.
    pub index: u64,
}

impl OutboundFrame {
    /// Build an outbound frame, normalizing a `null` payload to `{}`.
    #[must_use]
    pub fn new(route: impl Into<String>, data: Value, index: u64) -> Self {
        let data = if data.is_null() { Value::Object(Map::new()) } else { data };
        Self { route: route.into(), data, index }
    }
}

/// Server reply to a correlated request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub route: String,
    pub index: u64,
    /// `0` on success, `> 0` for an application error.
    pub status: i32,
    #[serde(default)]
    pub errmsg: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Unsolicited server push.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmitFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub errmsg: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl EmitFrame {
    /// Whether the server flagged this push as failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status > 0
    }
}

/// A server-to-client frame, discriminated by its `method` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum InboundFrame {
    Response(ResponseFrame),
    Emit(EmitFrame),
}

impl InboundFrame {
    /// Discriminator value as it appears on the wire.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Response(_) => "response",
            Self::Emit(_) => "emit",
        }
    }
}

/// Encode an outbound frame as JSON text.
#[must_use]
pub fn encode_outbound(frame: &OutboundFrame) -> String {
    // Serializing a struct of strings, integers and `Value` cannot fail; the
    // only serde_json error source is non-string map keys, which `Value` rules out.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode inbound JSON text into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed JSON, an unknown `method`, or
/// a missing required field.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode an inbound binary websocket message carrying UTF-8 JSON.
///
/// # Errors
///
/// Returns [`CodecError::NotUtf8`] for non-UTF-8 bytes, otherwise the same
/// errors as [`decode_inbound`].
pub fn decode_inbound_bytes(bytes: &[u8]) -> Result<InboundFrame, CodecError> {
    decode_inbound(std::str::from_utf8(bytes)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
