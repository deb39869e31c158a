//! Session metrics.
//!
//! # Metrics
//! - `sessions_accepted_total` (counter): accepted connections by protocol
//! - `sessions_degraded_total` (counter): sessions whose handler could not be built
//! - `sessions_active` (gauge): sessions currently tracked
//!
//! Recording is a no-op until an exporter is installed with [`init_metrics`].

use std::net::SocketAddr;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_accepted(protocol: &str) {
    metrics::counter!("sessions_accepted_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn record_session_degraded(protocol: &str) {
    metrics::counter!("sessions_degraded_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn set_active_sessions(count: usize) {
    metrics::gauge!("sessions_active").set(count as f64);
}
