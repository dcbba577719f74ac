//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::{CoordinatorStats, HubStats};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "parley_connections_rejected_total";
    pub const ACTIONS_TOTAL: &str = "parley_actions_total";
    pub const ACTION_ERRORS_TOTAL: &str = "parley_action_errors_total";
    pub const ACTION_LATENCY_SECONDS: &str = "parley_action_latency_seconds";
    pub const EVENTS_DELIVERED: &str = "parley_events_delivered_total";
    pub const EVENTS_DROPPED: &str = "parley_events_dropped_total";
    pub const ROOMS_ACTIVE: &str = "parley_rooms_active";
    pub const STREAMS_ACTIVE: &str = "parley_streams_active";
    pub const USERS_ONLINE: &str = "parley_users_online";
    pub const PROTOCOL_ERRORS_TOTAL: &str = "parley_protocol_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused because the server was full"
    );
    metrics::describe_counter!(names::ACTIONS_TOTAL, "Client actions processed, by action");
    metrics::describe_counter!(
        names::ACTION_ERRORS_TOTAL,
        "Client actions rejected, by error code"
    );
    metrics::describe_histogram!(
        names::ACTION_LATENCY_SECONDS,
        "Action processing latency in seconds"
    );
    metrics::describe_counter!(names::EVENTS_DELIVERED, "Events queued to connections");
    metrics::describe_counter!(
        names::EVENTS_DROPPED,
        "Events dropped because a connection queue was full or closed"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_gauge!(names::STREAMS_ACTIVE, "Streaming messages in flight");
    metrics::describe_gauge!(names::USERS_ONLINE, "Users currently marked online");
    metrics::describe_counter!(names::PROTOCOL_ERRORS_TOTAL, "Malformed or oversized frames");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn record_rejected_connection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record a processed action and its latency.
pub fn record_action(action: &'static str, seconds: f64) {
    counter!(names::ACTIONS_TOTAL, "action" => action).increment(1);
    histogram!(names::ACTION_LATENCY_SECONDS, "action" => action).record(seconds);
}

/// Record a rejected action.
pub fn record_action_error(action: &'static str, code: u16, kind: &'static str) {
    counter!(
        names::ACTION_ERRORS_TOTAL,
        "action" => action,
        "code" => code.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a frame that could not be decoded or was too large.
pub fn record_protocol_error(kind: &'static str) {
    counter!(names::PROTOCOL_ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Publish coordinator and hub state.
///
/// Hub counters are cumulative, so the exported counters are set to the
/// absolute values.
pub fn record_state(coordinator: &CoordinatorStats, hub: &HubStats) {
    gauge!(names::ROOMS_ACTIVE).set(coordinator.rooms as f64);
    gauge!(names::STREAMS_ACTIVE).set(coordinator.active_streams as f64);
    gauge!(names::USERS_ONLINE).set(coordinator.users_online as f64);
    counter!(names::EVENTS_DELIVERED).absolute(hub.delivered);
    counter!(names::EVENTS_DROPPED).absolute(hub.dropped);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
