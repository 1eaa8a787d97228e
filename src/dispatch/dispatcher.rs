//! The per-connection dispatch pipeline.
//!
//! For each inbound frame: look up the connection's metadata, decode, resolve
//! the handler, invoke it, normalize the reply, then encode and write every
//! emission tagged with the request's event name. Failures become a single
//! `error` packet. Decode errors and unknown events are dropped silently.

use std::fmt;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;

use super::connection::Connection;
use super::metadata::{ConnectionCallback, MetadataStore};
use super::reply::{HandlerError, ReplyItem, ReplyStream, normalize};
use crate::codec::{Frame, Packet, PacketCodec};

/// Routes decoded packets to the handlers bound on each connection.
pub struct Dispatcher {
    codec: Arc<dyn PacketCodec>,
    metadata: Arc<MetadataStore>,
    on_connect: RwLock<Option<ConnectionCallback>>,
}

impl Dispatcher {
    /// Creates a dispatcher speaking `codec` on every connection.
    #[must_use]
    pub fn new(codec: Arc<dyn PacketCodec>) -> Self {
        Self {
            codec,
            metadata: Arc::new(MetadataStore::new()),
            on_connect: RwLock::new(None),
        }
    }

    /// The wire codec in use.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn PacketCodec> {
        &self.codec
    }

    /// Metadata side table shared by this dispatcher's connections.
    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// Creates the handle for a newly accepted connection writing into
    /// `outbound`. Does not run the connect callback; see
    /// [`Dispatcher::on_open`].
    #[must_use]
    pub fn open_connection(&self, outbound: mpsc::UnboundedSender<Frame>) -> Connection {
        Connection::new(outbound, Arc::clone(&self.metadata))
    }

    /// Sets the callback run for every opened connection, replacing any
    /// previous one.
    pub fn set_connect_callback(&self, callback: ConnectionCallback) {
        *self
            .on_connect
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Transport "open" event.
    pub fn on_open(&self, conn: &Connection) {
        tracing::debug!(conn_id = %conn.id(), "connection opened");
        let callback = self
            .on_connect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(conn);
        }
    }

    /// Transport "message" event.
    ///
    /// Emissions that are ready immediately are written before this returns;
    /// the rest of the reply is driven on a spawned task, so this must run
    /// inside a tokio runtime.
    pub fn on_message(&self, conn: &Connection, bytes: &[u8]) {
        let Some((handlers, transform)) = conn
            .metadata()
            .get(conn.id())
            .and_then(|metadata| metadata.routing())
        else {
            tracing::trace!(conn_id = %conn.id(), "no handlers bound; message dropped");
            return;
        };

        let packet = match self.codec.decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::debug!(conn_id = %conn.id(), error = %err, "undecodable message dropped");
                return;
            }
        };

        let Some(handler) = handlers.resolve(&packet.event) else {
            tracing::debug!(conn_id = %conn.id(), event = %packet.event, "no handler for event");
            return;
        };

        let sink = ReplySink {
            conn: conn.clone(),
            codec: Arc::clone(&self.codec),
            event: packet.event,
        };

        let data = packet.data;
        let reply = match panic::catch_unwind(AssertUnwindSafe(|| handler(data))) {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                sink.fail(&err);
                return;
            }
            Err(_) => {
                tracing::error!(conn_id = %conn.id(), event = %sink.event, "handler panicked");
                sink.fail(&HandlerError::Internal);
                return;
            }
        };

        if let Some(replies) = normalize(reply, &transform) {
            sink.pump(guard_panics(replies));
        }
    }

    /// Transport "close" event.
    ///
    /// Releases the connection's metadata and runs its disconnect callback.
    pub fn on_close(&self, conn: &Connection) {
        tracing::debug!(conn_id = %conn.id(), "connection closed");
        let Some(metadata) = conn.metadata().release(conn.id()) else {
            return;
        };
        if let Some(disconnect) = metadata.disconnect {
            disconnect(conn);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("codec", &self.codec)
            .field("connections", &self.metadata.len())
            .finish_non_exhaustive()
    }
}

/// Turns a panic inside a reply producer into a final `Internal` failure.
fn guard_panics(replies: ReplyStream) -> ReplyStream {
    AssertUnwindSafe(replies)
        .catch_unwind()
        .map(|item| {
            item.unwrap_or_else(|_| {
                tracing::error!("reply stream panicked");
                Err(HandlerError::Internal)
            })
        })
        .boxed()
}

/// Writes the replies of one request back to its connection.
#[derive(Debug)]
struct ReplySink {
    conn: Connection,
    codec: Arc<dyn PacketCodec>,
    event: String,
}

impl ReplySink {
    /// Writes everything that is ready now, then hands the remainder to a
    /// task.
    fn pump(self, mut replies: ReplyStream) {
        loop {
            match replies.next().now_or_never() {
                Some(Some(item)) => {
                    if self.emit(item).is_break() {
                        return;
                    }
                }
                Some(None) => return,
                None => break,
            }
        }

        let span = tracing::debug_span!("reply", conn_id = %self.conn.id(), event = %self.event);
        tokio::spawn(self.drain(replies).instrument(span));
    }

    async fn drain(self, mut replies: ReplyStream) {
        while let Some(item) = replies.next().await {
            if self.emit(item).is_break() {
                break;
            }
        }
    }

    fn emit(&self, item: ReplyItem) -> ControlFlow<()> {
        match item {
            Ok(Some(data)) => self.write(&Packet::new(self.event.clone(), data)),
            Ok(None) => ControlFlow::Continue(()),
            Err(err) => {
                self.fail(&err);
                ControlFlow::Break(())
            }
        }
    }

    fn fail(&self, err: &HandlerError) {
        tracing::warn!(conn_id = %self.conn.id(), event = %self.event, error = %err, "handler failed");
        let _ = self.write(&Packet::error(err.to_string()));
    }

    /// Breaks once the connection is gone; later emissions have nowhere to go.
    fn write(&self, packet: &Packet) -> ControlFlow<()> {
        let frame = match self.codec.encode(packet) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(conn_id = %self.conn.id(), event = %packet.event, error = %err, "reply could not be encoded");
                return ControlFlow::Continue(());
            }
        };
        if self.conn.send(frame) {
            ControlFlow::Continue(())
        } else {
            tracing::debug!(conn_id = %self.conn.id(), event = %packet.event, "connection closed; reply dropped");
            ControlFlow::Break(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::stream;
    use serde_json::{Value, json};
    use tokio::sync::oneshot;

    use super::*;
    use crate::codec::{ERROR_EVENT, WireFormat};
    use crate::dispatch::registry::HandlerRegistry;
    use crate::dispatch::reply::{Reply, fire_and_forget, of_value};

    struct Fixture {
        dispatcher: Dispatcher,
        conn: Connection,
        rx: mpsc::UnboundedReceiver<Frame>,
    }

    impl Fixture {
        fn new(format: WireFormat) -> Self {
            let dispatcher = Dispatcher::new(format.codec());
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = dispatcher.open_connection(tx);
            Self {
                dispatcher,
                conn,
                rx,
            }
        }

        fn bound(handlers: HandlerRegistry) -> Self {
            let fixture = Self::new(WireFormat::Text);
            fixture.conn.bind_handlers(handlers, of_value());
            fixture
        }

        fn send(&self, event: &str, data: Value) {
            let Ok(frame) = self.dispatcher.codec().encode(&Packet::new(event, data)) else {
                panic!("encode failed");
            };
            self.dispatcher.on_message(&self.conn, frame.as_bytes());
        }

        fn decode(&self, frame: &Frame) -> Packet {
            let Ok(packet) = self.dispatcher.codec().decode(frame.as_bytes()) else {
                panic!("reply did not decode");
            };
            packet
        }

        /// Next frame already queued, without waiting.
        fn ready(&mut self) -> Option<Packet> {
            let frame = self.rx.try_recv().ok()?;
            Some(self.decode(&frame))
        }

        async fn next(&mut self) -> Packet {
            let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(1), self.rx.recv()).await
            else {
                panic!("expected a reply");
            };
            self.decode(&frame)
        }

        async fn assert_silent(&mut self) {
            let waited = tokio::time::timeout(Duration::from_millis(50), self.rx.recv()).await;
            assert!(waited.is_err(), "unexpected reply: {waited:?}");
        }
    }

    fn echo() -> HandlerRegistry {
        HandlerRegistry::new().with("echo", |data| Ok(Reply::Value(data)))
    }

    #[tokio::test]
    async fn plain_value_is_written_inline() {
        let mut fx = Fixture::bound(echo());
        fx.send("echo", json!({ "n": 1 }));
        assert_eq!(fx.ready(), Some(Packet::new("echo", json!({ "n": 1 }))));
        assert!(fx.ready().is_none());
    }

    #[tokio::test]
    async fn sync_replies_keep_request_order() {
        let mut fx = Fixture::bound(echo());
        for n in 0..5 {
            fx.send("echo", json!(n));
        }
        for n in 0..5 {
            assert_eq!(fx.ready(), Some(Packet::new("echo", json!(n))));
        }
    }

    #[tokio::test]
    async fn unknown_event_is_ignored() {
        let mut fx = Fixture::bound(echo());
        fx.send("nope", json!(1));
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn malformed_bytes_are_dropped() {
        let mut fx = Fixture::bound(echo());
        fx.dispatcher.on_message(&fx.conn, b"{not json");
        fx.dispatcher.on_message(&fx.conn, &[0xc1, 0x00]);
        fx.dispatcher.on_message(&fx.conn, b"");
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn unbound_connection_drops_messages() {
        let mut fx = Fixture::new(WireFormat::Text);
        fx.send("echo", json!(1));
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn disconnect_only_binding_does_not_route() {
        let mut fx = Fixture::new(WireFormat::Text);
        fx.conn.bind_disconnect(Arc::new(|_: &Connection| {}));
        fx.send("echo", json!(1));
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn sync_failure_sends_error_packet() {
        let mut fx = Fixture::bound(
            HandlerRegistry::new().with("fail", |_| Err(HandlerError::from("bad input"))),
        );
        fx.send("fail", Value::Null);
        assert_eq!(fx.ready(), Some(Packet::error("bad input")));
        assert!(fx.ready().is_none());
    }

    #[tokio::test]
    async fn handler_panic_sends_internal_error() {
        let mut fx = Fixture::bound(HandlerRegistry::new().with("explode", |_| {
            panic!("kaboom");
        }));
        fx.send("explode", Value::Null);
        assert_eq!(fx.ready(), Some(Packet::error("Internal error")));
    }

    #[tokio::test]
    async fn rejected_deferred_sends_message() {
        let mut fx = Fixture::bound(HandlerRegistry::new().with("slow", |_| {
            Ok(Reply::deferred(async {
                tokio::task::yield_now().await;
                Err(HandlerError::from("boom"))
            }))
        }));
        fx.send("slow", Value::Null);
        let packet = fx.next().await;
        assert_eq!(packet.event, ERROR_EVENT);
        assert_eq!(packet.data, json!("boom"));
    }

    #[tokio::test]
    async fn resolved_deferred_uses_request_event() {
        let mut fx = Fixture::bound(HandlerRegistry::new().with("slow", |data| {
            Ok(Reply::deferred(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(data)
            }))
        }));
        fx.send("slow", json!("later"));
        assert!(fx.ready().is_none());
        assert_eq!(fx.next().await, Packet::new("slow", json!("later")));
    }

    #[tokio::test]
    async fn stream_values_arrive_in_order() {
        let mut fx = Fixture::bound(HandlerRegistry::new().with("count", |_| {
            Ok(Reply::stream(
                stream::iter([1, 2, 3]).then(|n| async move {
                    tokio::task::yield_now().await;
                    Ok(json!(n))
                }),
            ))
        }));
        fx.send("count", Value::Null);
        for n in 1..=3 {
            assert_eq!(fx.next().await, Packet::new("count", json!(n)));
        }
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn stream_failure_stops_consumption() {
        let mut fx = Fixture::bound(HandlerRegistry::new().with("count", |_| {
            Ok(Reply::stream(stream::iter([
                Ok(json!(1)),
                Err(HandlerError::Internal),
                Ok(json!(2)),
            ])))
        }));
        fx.send("count", Value::Null);
        assert_eq!(fx.next().await, Packet::new("count", json!(1)));
        assert_eq!(fx.next().await, Packet::error("Internal error"));
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn stream_panic_becomes_internal_error() {
        let mut fx = Fixture::bound(HandlerRegistry::new().with("count", |_| {
            Ok(Reply::stream(stream::iter([1, 2]).map(|n| {
                if n == 2 {
                    panic!("producer bug");
                }
                Ok(json!(n))
            })))
        }));
        fx.send("count", Value::Null);
        assert_eq!(fx.next().await, Packet::new("count", json!(1)));
        assert_eq!(fx.next().await, Packet::error("Internal error"));
    }

    #[tokio::test]
    async fn no_response_markers_are_skipped() {
        let mut fx = Fixture::bound(HandlerRegistry::new().with("quiet", |_| {
            Ok(Reply::Stream(
                stream::iter([Ok(None), Ok(Some(json!("only"))), Ok(None)]).boxed(),
            ))
        }));
        fx.send("quiet", Value::Null);
        assert_eq!(fx.next().await, Packet::new("quiet", json!("only")));
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn empty_reply_writes_nothing() {
        let mut fx = Fixture::bound(HandlerRegistry::new().with("noop", |_| Ok(Reply::Empty)));
        fx.send("noop", Value::Null);
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn declined_transform_writes_nothing() {
        let mut fx = Fixture::new(WireFormat::Text);
        fx.conn.bind_handlers(echo(), fire_and_forget());
        fx.send("echo", json!(1));
        fx.assert_silent().await;
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_next_message() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = std::sync::Mutex::new(Some(release_rx));
        let handlers = echo().with("wait", move |_| {
            let pending = release_rx.lock().ok().and_then(|mut slot| slot.take());
            Ok(Reply::deferred(async move {
                if let Some(pending) = pending {
                    let _ = pending.await;
                }
                Ok(json!("released"))
            }))
        });
        let mut fx = Fixture::bound(handlers);

        fx.send("wait", Value::Null);
        fx.send("echo", json!("fast"));
        assert_eq!(fx.next().await, Packet::new("echo", json!("fast")));

        let _ = release_tx.send(());
        assert_eq!(fx.next().await, Packet::new("wait", json!("released")));
    }

    #[tokio::test]
    async fn binary_codec_writes_binary_frames() {
        let mut fx = Fixture::new(WireFormat::Binary);
        fx.conn.bind_handlers(echo(), of_value());
        fx.send("echo", json!([1, 2]));
        let Ok(frame) = fx.rx.try_recv() else {
            panic!("expected a reply");
        };
        assert!(frame.is_binary());
        assert_eq!(fx.decode(&frame), Packet::new("echo", json!([1, 2])));
    }

    #[tokio::test]
    async fn rebinding_replaces_handler_table() {
        let mut fx = Fixture::bound(echo());
        fx.conn.bind_handlers(
            HandlerRegistry::new().with("other", |_| Ok(Reply::Value(json!("new")))),
            of_value(),
        );
        fx.send("echo", json!(1));
        fx.assert_silent().await;
        fx.send("other", Value::Null);
        assert_eq!(fx.ready(), Some(Packet::new("other", json!("new"))));
    }

    #[test]
    fn open_runs_connect_callback() {
        let fx = Fixture::new(WireFormat::Text);
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        fx.dispatcher
            .set_connect_callback(Arc::new(move |_: &Connection| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        fx.dispatcher.on_open(&fx.conn);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_without_callback_is_harmless() {
        let fx = Fixture::new(WireFormat::Text);
        fx.dispatcher.on_open(&fx.conn);
        assert!(fx.dispatcher.metadata().is_empty());
    }

    #[test]
    fn close_runs_disconnect_once_and_releases() {
        let fx = Fixture::bound(echo());
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        let expected = fx.conn.id();
        fx.conn.bind_disconnect(Arc::new(move |conn: &Connection| {
            assert_eq!(conn.id(), expected);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        fx.dispatcher.on_close(&fx.conn);
        fx.dispatcher.on_close(&fx.conn);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(fx.dispatcher.metadata().is_empty());
    }

    #[tokio::test]
    async fn replies_after_close_are_dropped() {
        let Fixture {
            dispatcher,
            conn,
            rx,
        } = Fixture::bound(echo());
        drop(rx);
        let Ok(frame) = dispatcher.codec().encode(&Packet::new("echo", json!(1))) else {
            panic!("encode failed");
        };
        dispatcher.on_message(&conn, frame.as_bytes());
        assert!(conn.is_closed());
    }
}
