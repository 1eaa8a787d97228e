//! Per-connection metadata side table.
//!
//! Instead of hanging fields off the socket, every connection is keyed by a
//! [`ConnectionId`] into a [`MetadataStore`] owned by its dispatcher. A
//! record holds the handler table, the plain-result transform and the
//! disconnect callback. The handler pair and the disconnect callback are set
//! independently, so a record with handlers but no disconnect callback (or
//! the reverse) is a normal intermediate state.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::connection::Connection;
use super::registry::HandlerRegistry;
use super::reply::Transform;

/// Callback run with the connection when it opens or closes.
pub type ConnectionCallback = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Stable identity of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Creates a new random id (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the dispatcher knows about one connection.
#[derive(Clone, Default)]
pub struct ConnectionMetadata {
    /// Handler table routed against on every message.
    pub handlers: Option<Arc<HandlerRegistry>>,
    /// Transform applied to plain handler results.
    pub transform: Option<Transform>,
    /// Run once when the connection closes.
    pub disconnect: Option<ConnectionCallback>,
}

impl ConnectionMetadata {
    /// Returns the handler table and transform if both are bound.
    #[must_use]
    pub fn routing(&self) -> Option<(Arc<HandlerRegistry>, Transform)> {
        match (&self.handlers, &self.transform) {
            (Some(handlers), Some(transform)) => {
                Some((Arc::clone(handlers), Arc::clone(transform)))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for ConnectionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMetadata")
            .field("handlers", &self.handlers)
            .field("transform", &self.transform.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .finish()
    }
}

/// Side table of [`ConnectionMetadata`], one record per connection.
#[derive(Debug, Default)]
pub struct MetadataStore {
    records: DashMap<ConnectionId, ConnectionMetadata>,
}

impl MetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole record for `id`.
    pub fn attach(&self, id: ConnectionId, metadata: ConnectionMetadata) {
        self.records.insert(id, metadata);
    }

    /// Returns a snapshot of the record for `id`.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<ConnectionMetadata> {
        self.records.get(&id).map(|record| record.value().clone())
    }

    /// Sets the handler table and transform, keeping any disconnect callback.
    pub fn bind_handlers(&self, id: ConnectionId, handlers: HandlerRegistry, transform: Transform) {
        let mut record = self.records.entry(id).or_default();
        record.handlers = Some(Arc::new(handlers));
        record.transform = Some(transform);
    }

    /// Sets the disconnect callback, keeping any handler table.
    pub fn bind_disconnect(&self, id: ConnectionId, callback: ConnectionCallback) {
        self.records.entry(id).or_default().disconnect = Some(callback);
    }

    /// Removes and returns the record for `id`.
    pub fn release(&self, id: ConnectionId) -> Option<ConnectionMetadata> {
        self.records.remove(&id).map(|(_, metadata)| metadata)
    }

    /// Number of connections with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no connection has a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
