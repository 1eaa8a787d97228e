//! Server lifecycle: creating the listener, wiring connection callbacks and
//! closing the listener.
//!
//! [`Gateway::create`] returns immediately with a [`ServerHandle`]; binding
//! the socket happens on a spawned task. A failure to listen (port in use,
//! permission denied, unreadable TLS material) is logged and recorded in the
//! handle's [`ListenState`] rather than returned, since it happens after
//! `create` has returned.

pub mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};

use crate::app_state::AppState;
use crate::config::{ServerOptions, WsOptions};
use crate::dispatch::{Connection, ConnectionCallback, Dispatcher, HandlerRegistry, Transform};
use crate::error::GatewayError;
use crate::ws::build_router;

pub use tls::TlsListener;

/// Where a server is in its listen lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenState {
    /// The listener task has not bound the socket yet.
    Pending,
    /// Accepting connections on the given address.
    Listening(SocketAddr),
    /// Binding or TLS setup failed; the server never accepted connections.
    Failed(String),
    /// The listener was released by [`ServerHandle::close`].
    Closed,
}

/// Handle to one created server.
///
/// Cloning is cheap; all clones refer to the same listener.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

#[derive(Debug)]
struct ServerInner {
    port: u16,
    dispatcher: Arc<Dispatcher>,
    state: watch::Sender<ListenState>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl ServerHandle {
    fn new(port: u16, dispatcher: Arc<Dispatcher>) -> Self {
        let (state, _) = watch::channel(ListenState::Pending);
        Self {
            inner: Arc::new(ServerInner {
                port,
                dispatcher,
                state,
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Port requested at creation.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Dispatcher serving this server's connections.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Current listen state.
    #[must_use]
    pub fn state(&self) -> ListenState {
        self.inner.state.borrow().clone()
    }

    /// Bound address while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.inner.state.borrow() {
            ListenState::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    /// Waits for the outcome of the listen attempt.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ListenFailed`] if the listener could not be
    /// set up and [`GatewayError::Closed`] if it was already closed.
    pub async fn listening(&self) -> Result<SocketAddr, GatewayError> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|state| *state != ListenState::Pending)
            .await
            .map(|state| ListenState::clone(&state))
            .unwrap_or(ListenState::Closed);

        match state {
            ListenState::Listening(addr) => Ok(addr),
            ListenState::Failed(reason) => Err(GatewayError::ListenFailed {
                port: self.inner.port,
                reason,
            }),
            ListenState::Pending | ListenState::Closed => Err(GatewayError::Closed(self.inner.port)),
        }
    }

    /// Releases the listening socket.
    ///
    /// Only the first call after a successful listen does anything; later
    /// calls, and calls made before the socket is bound, are no-ops.
    pub fn close(&self) {
        let mut slot = self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(shutdown) = slot.take() else {
            return;
        };
        let _ = shutdown.send(());
        self.inner.state.send_replace(ListenState::Closed);
        drop(slot);
        tracing::info!(port = self.inner.port, "listen socket closed");
    }

    fn fail(&self, reason: String) {
        tracing::error!(port = self.inner.port, %reason, "failed to listen");
        self.inner.state.send_replace(ListenState::Failed(reason));
    }

    async fn serve(
        self,
        addr: SocketAddr,
        router: Router,
        tls_files: Option<(PathBuf, PathBuf)>,
    ) {
        let acceptor = match tls_files
            .map(|(cert, key)| tls::load_acceptor(&cert, &key))
            .transpose()
        {
            Ok(acceptor) => acceptor,
            Err(err) => return self.fail(err.to_string()),
        };

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => return self.fail(err.to_string()),
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(err) => return self.fail(err.to_string()),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        // Publishing under the lock keeps a concurrent close from being
        // overwritten by `Listening`.
        {
            let mut slot = self
                .inner
                .shutdown
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = Some(shutdown_tx);
            self.inner.state.send_replace(ListenState::Listening(local_addr));
        }
        tracing::info!(addr = %local_addr, tls = acceptor.is_some(), "listening");

        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let result = match acceptor {
            Some(acceptor) => {
                axum::serve(TlsListener::new(listener, acceptor), router)
                    .with_graceful_shutdown(shutdown)
                    .await
            }
            None => {
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown)
                    .await
            }
        };

        if let Err(err) = result {
            tracing::error!(addr = %local_addr, error = %err, "server stopped with error");
        }
    }
}

/// Entry point of the crate: creates servers and binds connection
/// callbacks.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use eventgate::config::{ServerOptions, WsOptions};
/// use eventgate::dispatch::{Connection, HandlerRegistry, Reply, of_value};
/// use eventgate::server::Gateway;
///
/// # async fn run() {
/// let gateway = Gateway::new(WsOptions::default(), ServerOptions::default());
/// let server = gateway.create(3001);
/// gateway.bind_client_connect(
///     &server,
///     Arc::new(|conn: &Connection| {
///         let handlers = HandlerRegistry::new().with("ping", |data| Ok(Reply::Value(data)));
///         conn.bind_handlers(handlers, of_value());
///     }),
/// );
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Gateway {
    ws: Arc<WsOptions>,
    server: ServerOptions,
}

impl Gateway {
    /// Creates a gateway with endpoint and listener options.
    #[must_use]
    pub fn new(ws: WsOptions, server: ServerOptions) -> Self {
        Self {
            ws: Arc::new(ws),
            server,
        }
    }

    /// Endpoint options.
    #[must_use]
    pub fn ws_options(&self) -> &WsOptions {
        &self.ws
    }

    /// Starts a server on `port` and returns its handle right away.
    ///
    /// TLS is used when both a certificate and a key file are configured.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn create(&self, port: u16) -> ServerHandle {
        if self.ws.compression {
            tracing::warn!(
                "per-message compression is not negotiated by this transport; frames are sent uncompressed"
            );
        }

        let dispatcher = Arc::new(Dispatcher::new(self.ws.wire_format.codec()));
        let handle = ServerHandle::new(port, Arc::clone(&dispatcher));
        let router = build_router(AppState {
            dispatcher,
            options: Arc::clone(&self.ws),
        });
        let addr = SocketAddr::new(self.server.host, port);
        let tls_files = self
            .server
            .tls_files()
            .map(|(cert, key)| (cert.clone(), key.clone()));

        tracing::debug!(%addr, wire_format = %self.ws.wire_format, "creating server");
        tokio::spawn(handle.clone().serve(addr, router, tls_files));
        handle
    }

    /// Sets the callback run for every connection opened on `server`.
    pub fn bind_client_connect(&self, server: &ServerHandle, callback: ConnectionCallback) {
        server.dispatcher().set_connect_callback(callback);
    }

    /// Sets the callback run when `client` closes.
    pub fn bind_client_disconnect(&self, client: &Connection, callback: ConnectionCallback) {
        client.bind_disconnect(callback);
    }

    /// Binds the handler table and plain-result transform for `client`.
    pub fn bind_message_handlers(
        &self,
        client: &Connection,
        handlers: HandlerRegistry,
        transform: Transform,
    ) {
        client.bind_handlers(handlers, transform);
    }

    /// Releases `server`'s listening socket; idempotent.
    pub fn close(&self, server: &ServerHandle) {
        server.close();
    }
}
