//! eventgate server entry point.
//!
//! Starts the WebSocket gateway with the demo chat handlers bound on every
//! connection, and closes the listener on Ctrl-C.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use eventgate::chat;
use eventgate::config::GatewayConfig;
use eventgate::server::Gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = GatewayConfig::from_env()?;
    tracing::info!(
        port = config.port,
        path = config.ws.path.as_deref().unwrap_or("/*"),
        wire_format = %config.ws.wire_format,
        "starting eventgate"
    );

    // Start server and bind the chat application
    let gateway = Gateway::new(config.ws, config.server);
    let server = gateway.create(config.port);
    gateway.bind_client_connect(&server, Arc::new(chat::on_connect));

    server.listening().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    gateway.close(&server);

    Ok(())
}
