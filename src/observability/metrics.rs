//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests by outcome
//! - `guard_rate_limited_total` (counter): 429 responses
//! - `guard_csrf_rejections_total` (counter): 403 responses
//! - `guard_csrf_tokens_issued_total` (counter): cookies planted
//! - `guard_rate_windows` (gauge): tracked rate windows after a sweep
//! - `guard_sweep_removed_total` (counter): windows removed by sweeps
//! - `guard_upstream_duration_seconds` (histogram): forwarding latency

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Final disposition of a request passing through the guard.
pub fn record_request(outcome: &'static str) {
    counter!("guard_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limited() {
    counter!("guard_rate_limited_total").increment(1);
}

pub fn record_csrf_rejection() {
    counter!("guard_csrf_rejections_total").increment(1);
}

pub fn record_csrf_issued() {
    counter!("guard_csrf_tokens_issued_total").increment(1);
}

pub fn record_sweep(removed: usize, remaining: usize) {
    counter!("guard_sweep_removed_total").increment(removed as u64);
    gauge!("guard_rate_windows").set(remaining as f64);
}

pub fn record_upstream(status: u16, start: Instant) {
    histogram!("guard_upstream_duration_seconds", "status" => status.to_string())
        .record(start.elapsed().as_secs_f64());
}
