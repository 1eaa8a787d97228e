//! Demo chat application served by the gateway binary.
//!
//! Two events:
//!
//! - `ping` answers `{ text, at }`, echoing `text` as sent (default
//!   `"pong"`) with the server time.
//! - `broadcast` acknowledges `{ text, delivered: true }` when `text` is
//!   truthy and answers nothing otherwise.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{Connection, HandlerError, HandlerRegistry, Reply, of_value};

/// Body accepted by both events. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatBody {
    /// Message text. Any JSON value is accepted and echoed as is; `null`
    /// counts as absent.
    pub text: Option<Value>,
}

impl ChatBody {
    /// Reads the body from a packet payload; a payload that is not an
    /// object has no text.
    #[must_use]
    pub fn from_data(data: Value) -> Self {
        serde_json::from_value(data).unwrap_or_default()
    }

    /// `text` when it is present and truthy: not `false`, `0`, or `""`.
    #[must_use]
    pub fn truthy_text(self) -> Option<Value> {
        self.text.filter(|text| match text {
            Value::Null => false,
            Value::Bool(flag) => *flag,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        })
    }
}

/// `ping` reply.
#[derive(Debug, Clone, Serialize)]
pub struct PingReply {
    /// Echoed text.
    pub text: Value,
    /// Server time, RFC 3339 with milliseconds.
    pub at: String,
}

/// `broadcast` acknowledgement.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastAck {
    /// Broadcast text.
    pub text: Value,
    /// Always `true`.
    pub delivered: bool,
}

/// `ping` handler.
///
/// # Errors
///
/// Never fails in practice; serialization errors are reported to the peer.
pub fn ping(data: Value) -> Result<Reply, HandlerError> {
    let text = ChatBody::from_data(data)
        .text
        .unwrap_or_else(|| Value::from("pong"));
    Reply::json(&PingReply {
        text,
        at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// `broadcast` handler.
///
/// # Errors
///
/// Never fails in practice; serialization errors are reported to the peer.
pub fn broadcast(data: Value) -> Result<Reply, HandlerError> {
    match ChatBody::from_data(data).truthy_text() {
        Some(text) => Reply::json(&BroadcastAck {
            text,
            delivered: true,
        }),
        None => Ok(Reply::Empty),
    }
}

/// Handler table of the chat application.
#[must_use]
pub fn handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .with("ping", ping)
        .with("broadcast", broadcast)
}

/// Connect callback: binds the chat handlers and a disconnect logger.
pub fn on_connect(conn: &Connection) {
    conn.bind_handlers(handlers(), of_value());
    conn.bind_disconnect(Arc::new(|conn: &Connection| {
        tracing::info!(conn_id = %conn.id(), "client disconnected");
    }));
    tracing::info!(conn_id = %conn.id(), "client connected");
}
