//! WebSocket transport: upgrade handling, routing and the per-connection
//! read/write loop.
//!
//! The transport owns the socket; every open, message and close event is
//! forwarded to the [`crate::dispatch::Dispatcher`].

pub mod connection;
pub mod handler;

pub use handler::build_router;
