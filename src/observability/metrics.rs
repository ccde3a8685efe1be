//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, segments, throughput, sessions, errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `abr_requests_total` (counter): forwarded requests by kind
//! - `abr_segments_total` (counter): segment requests by chosen bitrate
//! - `abr_throughput_kbps` (histogram): per-segment throughput samples
//! - `abr_active_sessions` (gauge): current client sessions
//! - `abr_session_errors_total` (counter): terminal session errors by kind
//! - `abr_rejected_connections_total` (counter): clients turned away at capacity
//!
//! # Design Decisions
//! - Without an installed recorder every call below is a no-op
//! - Labels are low-cardinality (request kind, bitrate, error kind)

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// A request was forwarded to the origin.
pub fn record_request(kind: &'static str) {
    metrics::counter!("abr_requests_total", "kind" => kind).increment(1);
}

/// A segment request was rewritten to `bitrate`.
pub fn record_segment(bitrate: u32) {
    metrics::counter!("abr_segments_total", "bitrate" => bitrate.to_string()).increment(1);
}

pub fn record_throughput(kbps: f64) {
    metrics::histogram!("abr_throughput_kbps").record(kbps);
}

pub fn set_active_sessions(count: usize) {
    metrics::gauge!("abr_active_sessions").set(count as f64);
}

pub fn record_session_error(kind: &'static str) {
    metrics::counter!("abr_session_errors_total", "kind" => kind).increment(1);
}

pub fn record_rejected_connection() {
    metrics::counter!("abr_rejected_connections_total").increment(1);
}
