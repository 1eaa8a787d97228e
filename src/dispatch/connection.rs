//! Application-facing handle to one open connection.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::metadata::{ConnectionCallback, ConnectionId, MetadataStore};
use super::registry::HandlerRegistry;
use super::reply::Transform;
use crate::codec::Frame;

/// Cheap, cloneable handle to an open connection.
///
/// Writes go through an unbounded queue drained by the connection's
/// transport task, so [`Connection::send`] never waits. Metadata lives in the
/// dispatcher's [`MetadataStore`]; the handle only carries a reference to it.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Frame>,
    metadata: Arc<MetadataStore>,
}

impl Connection {
    /// Creates a handle writing into `outbound` and keeping its metadata in
    /// `metadata`.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Frame>, metadata: Arc<MetadataStore>) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
            metadata,
        }
    }

    /// Stable identity of this connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `frame` for writing.
    ///
    /// Returns `false` if the transport side is gone; the frame is dropped.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Returns `true` once the transport stopped draining this connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Binds the handler table and plain-result transform, replacing any
    /// previous table.
    ///
    /// Ignored once the connection has closed, so no record outlives it.
    pub fn bind_handlers(&self, handlers: HandlerRegistry, transform: Transform) {
        if self.is_closed() {
            tracing::debug!(conn_id = %self.id, "bind after close ignored");
            return;
        }
        self.metadata.bind_handlers(self.id, handlers, transform);
    }

    /// Binds the callback run when this connection closes.
    ///
    /// Ignored once the connection has closed.
    pub fn bind_disconnect(&self, callback: ConnectionCallback) {
        if self.is_closed() {
            tracing::debug!(conn_id = %self.id, "bind after close ignored");
            return;
        }
        self.metadata.bind_disconnect(self.id, callback);
    }

    pub(crate) fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }
}
