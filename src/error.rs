//! Gateway error types.
//!
//! [`GatewayError`] covers everything outside the per-message pipeline:
//! configuration, TLS material, I/O and the outcome of listening. Codec and
//! handler failures have their own types ([`crate::codec::CodecError`],
//! [`crate::dispatch::HandlerError`]) and never leave the dispatch loop.

/// Server-side error enum.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Certificate or private key could not be loaded.
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// Socket or file I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The listener never came up.
    #[error("failed to listen on port {port}: {reason}")]
    ListenFailed {
        /// Requested port.
        port: u16,
        /// Why binding or TLS setup failed.
        reason: String,
    },

    /// The listener was closed.
    #[error("listener on port {0} is closed")]
    Closed(u16),
}

impl From<tokio_rustls::rustls::Error> for GatewayError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}
