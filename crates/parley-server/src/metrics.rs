//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket transports accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket transports ended (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket transports, identified or not (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Transport lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Sessions that completed identification (counter).
pub const CHAT_SESSIONS_IDENTIFIED_TOTAL: &str = "chat_sessions_identified_total";
/// Sessions closed with 4001 (counter).
pub const CHAT_IDENTIFY_FAILURES_TOTAL: &str = "chat_identify_failures_total";
/// Chat messages relayed (counter).
pub const CHAT_MESSAGES_TOTAL: &str = "chat_messages_total";
/// Recipients evicted because their queue was full (counter).
pub const CHAT_SLOW_CLIENT_EVICTIONS_TOTAL: &str = "chat_slow_client_evictions_total";
/// Registrations removed during delivery (counter).
pub const CHAT_BROADCAST_PRUNED_TOTAL: &str = "chat_broadcast_pruned_total";
