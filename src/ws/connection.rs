//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection: inbound
//! frames are handed to the [`Dispatcher`], replies queued on the
//! [`crate::dispatch::Connection`] handle are written back, and the idle
//! timeout is enforced.
//!
//! While an idle timeout is set the server pings the peer every half
//! timeout. A live peer answers with a pong, which counts as inbound
//! traffic, so only unresponsive peers are closed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::Frame;
use crate::dispatch::Dispatcher;

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::text(text),
            Frame::Binary(bytes) => Self::binary(bytes),
        }
    }
}

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Announces the connection to the dispatcher (open).
/// - Dispatches every text or binary frame.
/// - Writes queued replies in the order they were queued.
/// - Pings the peer every half `idle_timeout`.
/// - Closes after `idle_timeout` without inbound traffic.
/// - Announces the close to the dispatcher once the socket is done.
pub async fn run_connection(
    socket: WebSocket,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Option<Duration>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let conn = dispatcher.open_connection(out_tx);
    dispatcher.on_open(&conn);

    let idle = tokio::time::sleep(idle_timeout.unwrap_or_default());
    tokio::pin!(idle);

    // The heartbeat arm is disabled without a keep-alive; the period only
    // has to be valid.
    let keepalive = idle_timeout.and_then(keepalive_period);
    let period = keepalive.unwrap_or(Duration::from_secs(3600));
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Incoming frame from the peer
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatcher.on_message(&conn, text.as_str().as_bytes());
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        dispatcher.on_message(&conn, &bytes);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|frame| frame.code);
                        tracing::debug!(conn_id = %conn.id(), ?code, "peer closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(err)) => {
                        tracing::debug!(conn_id = %conn.id(), error = %err, "ws read failed");
                        break;
                    }
                    None => break,
                }
                if let Some(timeout) = idle_timeout {
                    idle.as_mut().reset(Instant::now() + timeout);
                }
            }
            // Reply queued by the dispatcher
            Some(frame) = out_rx.recv() => {
                if ws_tx.send(Message::from(frame)).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick(), if keepalive.is_some() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            () = &mut idle, if idle_timeout.is_some() => {
                tracing::debug!(conn_id = %conn.id(), "idle timeout; closing connection");
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    dispatcher.on_close(&conn);
    tracing::debug!(conn_id = %conn.id(), "ws connection closed");
}

/// Ping interval for a given idle timeout; `None` when it would be zero.
fn keepalive_period(idle_timeout: Duration) -> Option<Duration> {
    let period = idle_timeout / 2;
    (!period.is_zero()).then_some(period)
}
