//! Packet codecs: the wire representation of `{event, data}` packets.
//!
//! A [`PacketCodec`] turns a [`Packet`] into a [`Frame`] and back. Two
//! codecs ship with the crate:
//!
//! - [`JsonCodec`]: JSON carried in text frames.
//! - [`MsgPackCodec`]: MessagePack (map encoding) carried in binary frames.
//!
//! The codec is picked once per gateway through [`WireFormat`]; frames are
//! never negotiated per message.

pub mod json;
pub mod msgpack;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

/// Event name carried by every failure reply.
pub const ERROR_EVENT: &str = "error";

/// Application-level message exchanged over a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Event name used to route the packet to a handler.
    pub event: String,
    /// Opaque payload. Missing payloads decode as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Packet {
    /// Creates a packet for `event` carrying `data`.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Creates the `error` packet sent when a handler fails.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ERROR_EVENT, Value::String(message.into()))
    }

    fn validate(self) -> Result<Self, CodecError> {
        if self.event.is_empty() {
            return Err(CodecError::EmptyEvent);
        }
        Ok(self)
    }
}

/// A single encoded WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Returns the raw payload bytes of the frame.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns `true` for binary frames.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

/// Failure to encode or decode a packet.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON envelope could not be parsed or produced.
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack envelope could not be parsed.
    #[error("msgpack decode: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// MessagePack envelope could not be produced.
    #[error("msgpack encode: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// The envelope parsed but its event name is empty.
    #[error("packet has an empty event name")]
    EmptyEvent,
}

/// Bidirectional transform between a [`Packet`] and its wire frame.
pub trait PacketCodec: Send + Sync + fmt::Debug {
    /// Encodes `packet` into a frame ready to be written.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload cannot be represented in the
    /// wire format.
    fn encode(&self, packet: &Packet) -> Result<Frame, CodecError>;

    /// Decodes a received frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if `bytes` is not a well-formed envelope or
    /// its event name is missing or empty.
    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError>;

    /// The wire format this codec implements.
    fn format(&self) -> WireFormat;
}

/// Wire encoding of packets, chosen at construction time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// JSON in text frames.
    Text,
    /// MessagePack in binary frames.
    #[default]
    Binary,
}

impl WireFormat {
    /// Builds the codec for this format.
    #[must_use]
    pub fn codec(self) -> Arc<dyn PacketCodec> {
        match self {
            Self::Text => Arc::new(JsonCodec),
            Self::Binary => Arc::new(MsgPackCodec),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "json" => Ok(Self::Text),
            "binary" | "msgpack" => Ok(Self::Binary),
            other => Err(format!("unknown wire format: {other}")),
        }
    }
}
