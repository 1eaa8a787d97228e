//! Axum WebSocket upgrade handler and router.

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use super::connection::run_connection;
use crate::app_state::AppState;

/// Upgrades an HTTP request to a dispatched WebSocket connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max = state.options.max_payload_length;
    let idle_timeout = state.options.idle_duration();
    let dispatcher = std::sync::Arc::clone(&state.dispatcher);

    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_connection(socket, dispatcher, idle_timeout))
}

/// Builds the router serving the WebSocket endpoint.
///
/// With an explicit path the handler is mounted there and every other path
/// answers 404; otherwise it is the fallback for every path.
pub fn build_router(state: AppState) -> Router {
    let router = match state.options.mount_path() {
        Some(path) => Router::new().route(path, get(ws_handler)),
        None => Router::new().fallback(ws_handler),
    };
    router.layer(TraceLayer::new_for_http()).with_state(state)
}
