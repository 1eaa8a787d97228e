//! # eventgate
//!
//! Event-dispatching WebSocket gateway.
//!
//! Every connection exchanges `{event, data}` packets. Inbound packets are
//! routed by event name to the handlers bound on that connection; whatever
//! a handler produces (a value, nothing, a future, a stream) is written back
//! under the same event name, and failures come back as a single `error`
//! packet.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket)
//!     │
//!     ├── Server lifecycle (server/)      plain or TLS listener, close
//!     ├── Transport loop (ws/)            upgrade, read/write, idle timeout
//!     │
//!     ├── Dispatcher (dispatch/)          decode → route → invoke → reply
//!     │     ├── MetadataStore             per-connection handler tables
//!     │     ├── HandlerRegistry           event name → handler
//!     │     └── normalize                 Reply → ReplyStream
//!     │
//!     └── Packet codecs (codec/)          JSON text / MessagePack binary
//! ```

pub mod app_state;
pub mod chat;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod ws;
