//! # parley
//!
//! Chat relay server binary: loads settings, sets up logging and metrics,
//! and runs the HTTP/WebSocket server until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use parley_server::{ChatServer, ServerConfig};
use parley_settings::{ParleySettings, ServerSettings};
use parley_telemetry::TelemetryConfig;

/// Real-time chat relay.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time chat relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.parley/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

fn server_config(s: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: s.host.clone(),
        port: s.port,
        max_connections: s.max_connections,
        max_message_size: s.max_message_size,
        send_queue_capacity: s.send_queue_capacity,
        heartbeat_interval_secs: s.heartbeat_interval_secs,
        heartbeat_timeout_secs: s.heartbeat_timeout_secs,
        identify_timeout_secs: s.identify_timeout_secs,
        shutdown_timeout_secs: s.shutdown_timeout_secs,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.config.clone().unwrap_or_else(parley_settings::settings_path);
    let mut settings = parley_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    let telemetry = TelemetryConfig::from_strings(
        &settings.logging.level,
        &settings.logging.module_levels,
        settings.logging.json,
    )
    .context("Invalid logging settings")?;
    parley_telemetry::init_telemetry(&telemetry).context("Failed to initialize logging")?;

    let metrics = parley_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = server_config(&settings.server);
    let shutdown_timeout = config.shutdown_timeout();
    let server = ChatServer::new(config).with_metrics(metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("parley listening on http://{addr} (ws: /api/chat-ws)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let clean = server
        .shutdown()
        .graceful_shutdown(handle, shutdown_timeout)
        .await;
    tracing::info!(clean, "Shutdown complete");
    Ok(())
}
