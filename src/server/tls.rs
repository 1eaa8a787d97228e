//! TLS listener for [`axum::serve`].
//!
//! Certificates and keys are PEM files loaded with `rustls-pemfile`; the
//! handshake runs inside [`Listener::accept`], so `axum::serve` only ever
//! sees established TLS streams.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::serve::Listener;
use rustls_pemfile::{certs, private_key};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::server::TlsStream;

use crate::error::GatewayError;

/// Longest a peer may take to complete the TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Loads a PEM certificate chain and private key into a [`TlsAcceptor`].
///
/// # Errors
///
/// Returns [`GatewayError::Io`] if a file cannot be read and
/// [`GatewayError::Tls`] if it holds no certificate or key, or rustls
/// rejects the pair.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, GatewayError> {
    let cert_pem = std::fs::read(cert_path)?;
    let chain: Vec<CertificateDer<'static>> =
        certs(&mut cert_pem.as_slice()).collect::<Result<Vec<_>, _>>()?;
    if chain.is_empty() {
        return Err(GatewayError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key_pem = std::fs::read(key_path)?;
    let key = private_key(&mut key_pem.as_slice())?.ok_or_else(|| {
        GatewayError::Tls(format!("no private key found in {}", key_path.display()))
    })?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// TCP listener that hands out TLS streams.
pub struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    /// Wraps a bound TCP listener.
    #[must_use]
    pub fn new(inner: TcpListener, acceptor: TlsAcceptor) -> Self {
        Self { inner, acceptor }
    }
}

impl fmt::Debug for TlsListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsListener")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to accept tcp connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => return (tls_stream, addr),
                Ok(Err(err)) => {
                    tracing::warn!(%addr, error = %err, "tls handshake failed");
                }
                Err(_) => {
                    tracing::warn!(%addr, "tls handshake timed out");
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
