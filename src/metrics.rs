//! Prometheus metrics for the rate limiter.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `rate_limit_requests_total` - Admission decisions (label: outcome = admitted|rejected)
//! - `rate_limit_evictions_total` - Clients evicted to stay under capacity
//! - `rate_limit_swept_total` - Idle clients removed by the background sweep
//!
//! ## Gauges
//! - `rate_limit_tracked_clients` - Clients currently holding a bucket
//!
//! Without an installed recorder (unit tests) every call here is a no-op.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "rate_limit_requests_total";
    pub const EVICTIONS_TOTAL: &str = "rate_limit_evictions_total";
    pub const SWEPT_TOTAL: &str = "rate_limit_swept_total";
    pub const TRACKED_CLIENTS: &str = "rate_limit_tracked_clients";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. the port is taken).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Rate limiter admission decisions by outcome"
    );
    describe_counter!(
        names::EVICTIONS_TOTAL,
        "Clients evicted because the limiter was at capacity"
    );
    describe_counter!(
        names::SWEPT_TOTAL,
        "Idle clients removed by the background sweep"
    );
    describe_gauge!(
        names::TRACKED_CLIENTS,
        "Clients currently tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Record one admission decision.
#[inline]
pub fn record_admission(admitted: bool) {
    let outcome = if admitted { "admitted" } else { "rejected" };
    counter!(names::REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

pub fn record_swept(count: usize) {
    if count > 0 {
        counter!(names::SWEPT_TOTAL).increment(count as u64);
    }
}

/// Set the tracked-clients gauge.
pub fn set_tracked_clients(count: usize) {
    gauge!(names::TRACKED_CLIENTS).set(count as f64);
}
