//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "parley_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "parley_sessions_active";
    pub const ONLINE_USERS: &str = "parley_online_users";
    pub const AUTH_REJECTIONS_TOTAL: &str = "parley_auth_rejections_total";
    pub const FRAMES_RECEIVED_TOTAL: &str = "parley_frames_received_total";
    pub const EVENTS_SENT_TOTAL: &str = "parley_events_sent_total";
    pub const EVENTS_DROPPED: &str = "parley_events_dropped";
    pub const MESSAGES_CREATED_TOTAL: &str = "parley_messages_created_total";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of admitted sessions since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of open sessions");
    metrics::describe_gauge!(
        names::ONLINE_USERS,
        "Users with at least one open session"
    );
    metrics::describe_counter!(
        names::AUTH_REJECTIONS_TOTAL,
        "Connection attempts refused, by reason"
    );
    metrics::describe_counter!(
        names::FRAMES_RECEIVED_TOTAL,
        "Client frames received, by type"
    );
    metrics::describe_counter!(
        names::EVENTS_SENT_TOTAL,
        "Frames written to sessions, by type"
    );
    metrics::describe_gauge!(
        names::EVENTS_DROPPED,
        "Events dropped because a session's outbound queue was full"
    );
    metrics::describe_counter!(names::MESSAGES_CREATED_TOTAL, "Chat messages persisted");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a refused connection attempt.
pub fn record_auth_rejection(reason: &'static str) {
    counter!(names::AUTH_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record an inbound client frame.
pub fn record_frame(kind: &'static str) {
    counter!(names::FRAMES_RECEIVED_TOTAL, "type" => kind).increment(1);
}

/// Record a frame written to a session.
pub fn record_event(kind: &'static str) {
    counter!(names::EVENTS_SENT_TOTAL, "type" => kind).increment(1);
}

/// Record a persisted chat message.
pub fn record_message_created() {
    counter!(names::MESSAGES_CREATED_TOTAL).increment(1);
}

/// Update presence gauges.
pub fn set_presence(online_users: usize, dropped_events: u64) {
    gauge!(names::ONLINE_USERS).set(online_users as f64);
    gauge!(names::EVENTS_DROPPED).set(dropped_events as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records session close on drop.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording an admitted session.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SESSIONS_TOTAL).increment(1);
        gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    }
}
