//! Shared application state injected into the WebSocket upgrade handler.

use std::sync::Arc;

use crate::config::WsOptions;
use crate::dispatch::Dispatcher;

/// Shared state available to the upgrade handler via Axum's `State`
/// extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Dispatcher receiving every connection's events.
    pub dispatcher: Arc<Dispatcher>,
    /// Endpoint options applied at upgrade time.
    pub options: Arc<WsOptions>,
}
