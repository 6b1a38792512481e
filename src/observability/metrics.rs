//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define pipeline metrics (lookups, HTTP calls, breaker state, cache ops)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `registry_lookups_total` (counter): lookups by outcome
//! - `registry_http_requests_total` (counter): outbound calls by status
//! - `registry_http_duration_seconds` (histogram): outbound latency
//! - `circuit_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `cache_operations_total` (counter): cache ops by layer and kind
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until an exporter is installed
//! - Components keep their own counters for the health API; these are
//!   exported copies, not the source of truth

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_lookup(outcome: &'static str) {
    metrics::counter!("registry_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_http_call(status: Option<u16>, latency: Duration) {
    let status = status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string());
    metrics::counter!("registry_http_requests_total", "status" => status).increment(1);
    metrics::histogram!("registry_http_duration_seconds").record(latency.as_secs_f64());
}

pub fn record_fatal_error() {
    metrics::counter!("registry_fatal_errors_total").increment(1);
}

pub fn record_audit_record() {
    metrics::counter!("registry_audit_records_total").increment(1);
}

pub fn record_circuit_state(name: &str, state_code: u8) {
    metrics::gauge!("circuit_breaker_state", "name" => name.to_string()).set(state_code as f64);
}

pub fn record_circuit_transition(name: &str, from: &'static str, to: &'static str) {
    metrics::counter!(
        "circuit_breaker_transitions_total",
        "name" => name.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub fn record_circuit_rejection(name: &str) {
    metrics::counter!("circuit_breaker_rejected_total", "name" => name.to_string()).increment(1);
}

pub fn record_rate_limited() {
    metrics::counter!("rate_limiter_denied_total").increment(1);
}

pub fn record_cache_op(layer: &'static str, op: &'static str) {
    metrics::counter!("cache_operations_total", "layer" => layer, "op" => op).increment(1);
}
