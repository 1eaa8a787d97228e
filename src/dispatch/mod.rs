//! Dispatch layer: handler tables, reply normalization, connection
//! metadata and the per-message pipeline.
//!
//! The transport hands every connection event to a [`Dispatcher`]; the
//! application binds a [`HandlerRegistry`] and a [`Transform`] on each
//! [`Connection`] (usually from the connect callback) and may bind a
//! disconnect callback.

pub mod connection;
pub mod dispatcher;
pub mod metadata;
pub mod registry;
pub mod reply;

pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use metadata::{ConnectionCallback, ConnectionId, ConnectionMetadata, MetadataStore};
pub use registry::{Handler, HandlerBinding, HandlerRegistry};
pub use reply::{HandlerError, Reply, ReplyItem, ReplyStream, Transform, fire_and_forget, normalize, of_value};
