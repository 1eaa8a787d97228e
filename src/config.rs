//! Gateway configuration.
//!
//! [`WsOptions`] and [`ServerOptions`] are the construction-time options of
//! a [`crate::server::Gateway`]. [`GatewayConfig::from_env`] loads them
//! 12-factor style from environment variables (or a `.env` file via
//! `dotenvy`) for the binary.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::WireFormat;
use crate::error::GatewayError;

/// Default maximum inbound message size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 16 * 1024 * 1024;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Path value meaning "every path".
pub const MATCH_ALL_PATH: &str = "/*";

/// WebSocket endpoint options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsOptions {
    /// URL path the upgrade handler is mounted on. `None` or `"/*"`
    /// accepts upgrades on any path.
    pub path: Option<String>,

    /// Largest accepted inbound message (and frame), in bytes.
    pub max_payload_length: usize,

    /// Seconds without inbound traffic before the connection is closed.
    /// `0` disables the timeout.
    pub idle_timeout: u64,

    /// Per-message compression request.
    pub compression: bool,

    /// Packet encoding used on every connection.
    pub wire_format: WireFormat,
}

impl WsOptions {
    /// Returns the explicit mount path, or `None` for match-all.
    #[must_use]
    pub fn mount_path(&self) -> Option<&str> {
        self.path
            .as_deref()
            .filter(|path| !path.is_empty() && *path != MATCH_ALL_PATH)
    }

    /// Idle timeout as a [`Duration`], `None` when disabled.
    #[must_use]
    pub fn idle_duration(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            path: None,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            compression: false,
            wire_format: WireFormat::default(),
        }
    }
}

/// Listener options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Interface to bind.
    pub host: IpAddr,

    /// PEM certificate chain. TLS is enabled only when both this and
    /// [`ServerOptions::tls_key_file`] are set.
    pub tls_cert_file: Option<PathBuf>,

    /// PEM private key.
    pub tls_key_file: Option<PathBuf>,
}

impl ServerOptions {
    /// Returns the certificate and key paths when TLS is fully configured.
    #[must_use]
    pub fn tls_files(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert_file.as_ref().zip(self.tls_key_file.as_ref())
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tls_cert_file: None,
            tls_key_file: None,
        }
    }
}

/// Top-level configuration of the gateway binary.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Port to listen on.
    pub port: u16,

    /// WebSocket endpoint options.
    pub ws: WsOptions,

    /// Listener options.
    pub server: ServerOptions,
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// | Variable                | Default     |
    /// |-------------------------|-------------|
    /// | `PORT`                  | `3001`      |
    /// | `LISTEN_HOST`           | `0.0.0.0`   |
    /// | `WS_PATH`               | match-all   |
    /// | `WS_MAX_PAYLOAD_LENGTH` | 16 MiB      |
    /// | `WS_IDLE_TIMEOUT_SECS`  | `60`        |
    /// | `WS_COMPRESSION`        | `false`     |
    /// | `WS_WIRE_FORMAT`        | `binary`    |
    /// | `TLS_CERT_FILE`         | unset       |
    /// | `TLS_KEY_FILE`          | unset       |
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if `LISTEN_HOST` is not an IP
    /// address or `WS_WIRE_FORMAT` names an unknown format.
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GatewayError> {
        let defaults = WsOptions::default();

        let host = match lookup("LISTEN_HOST") {
            Some(raw) => raw
                .parse()
                .map_err(|err| GatewayError::Config(format!("LISTEN_HOST={raw}: {err}")))?,
            None => ServerOptions::default().host,
        };

        let wire_format = match lookup("WS_WIRE_FORMAT") {
            Some(raw) => raw.parse().map_err(GatewayError::Config)?,
            None => defaults.wire_format,
        };

        Ok(Self {
            port: parse_value(lookup("PORT"), 3001),
            ws: WsOptions {
                path: lookup("WS_PATH"),
                max_payload_length: parse_value(
                    lookup("WS_MAX_PAYLOAD_LENGTH"),
                    defaults.max_payload_length,
                ),
                idle_timeout: parse_value(lookup("WS_IDLE_TIMEOUT_SECS"), defaults.idle_timeout),
                compression: parse_bool(lookup("WS_COMPRESSION"), defaults.compression),
                wire_format,
            },
            server: ServerOptions {
                host,
                tls_cert_file: lookup("TLS_CERT_FILE").map(PathBuf::from),
                tls_key_file: lookup("TLS_KEY_FILE").map(PathBuf::from),
            },
        })
    }
}

/// Parses `raw` as `T`, returning `default` on missing or invalid values.
fn parse_value<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parses a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
/// (case-insensitive). Returns `default` otherwise.
fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw.map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
