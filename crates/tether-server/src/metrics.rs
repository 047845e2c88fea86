//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "tether_connections_total";
/// Connections currently open (gauge).
pub const CONNECTIONS_ACTIVE: &str = "tether_connections_active";
/// Connections closed (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "tether_disconnections_total";
/// Packets received from clients (counter, labels: type).
pub const PACKETS_IN_TOTAL: &str = "tether_packets_in_total";
/// JOIN outcomes (counter, labels: outcome).
pub const JOINS_TOTAL: &str = "tether_joins_total";
/// LEAVE outcomes (counter, labels: outcome).
pub const LEAVES_TOTAL: &str = "tether_leaves_total";
/// EVENT deliveries to local subscribers (counter).
pub const EVENTS_DELIVERED_TOTAL: &str = "tether_events_delivered_total";
/// Outbound frames dropped on full or closed queues (counter).
pub const OUTBOUND_DROPPED_TOTAL: &str = "tether_outbound_dropped_total";
/// Connections evicted by the liveness supervisor (counter).
pub const LIVENESS_EVICTIONS_TOTAL: &str = "tether_liveness_evictions_total";
/// Cluster messages accepted by siblings (counter).
pub const CLUSTER_SENT_TOTAL: &str = "tether_cluster_sent_total";
/// Cluster messages received from siblings (counter).
pub const CLUSTER_RECEIVED_TOTAL: &str = "tether_cluster_received_total";
/// Cluster sends that a sibling did not accept (counter).
pub const CLUSTER_SEND_FAILURES_TOTAL: &str = "tether_cluster_send_failures_total";
