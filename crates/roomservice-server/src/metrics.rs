//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Fails if a
/// global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos.

/// WebSocket sessions opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions closed total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Envelopes broadcast total (counter).
pub const WS_BROADCASTS_TOTAL: &str = "ws_broadcasts_total";
/// Per-session delivery failures during broadcast (counter).
pub const WS_BROADCAST_FAILURES_TOTAL: &str = "ws_broadcast_failures_total";
/// Sessions evicted by the liveness monitor (counter).
pub const WS_LIVENESS_EVICTIONS_TOTAL: &str = "ws_liveness_evictions_total";
/// Orders created through the notifying store (counter).
pub const ORDERS_CREATED_TOTAL: &str = "orders_created_total";
/// Order updates committed through the notifying store (counter).
pub const ORDERS_UPDATED_TOTAL: &str = "orders_updated_total";
