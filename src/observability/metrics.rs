//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, backend
//! - `gateway_request_duration_seconds` (histogram): latency by backend
//! - `gateway_cache_lookups_total` (counter): cache lookups by result
//! - `gateway_cache_bytes` / `gateway_cache_entries` (gauges): cache usage
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `gateway_retries_total` (counter): retry attempts by backend and reason
//!
//! Without an installed recorder every helper is a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::BreakerState;

static DESCRIBED: OnceLock<()> = OnceLock::new();

fn describe() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("gateway_requests_total", "Total proxied requests");
        describe_histogram!(
            "gateway_request_duration_seconds",
            "Proxied request duration in seconds"
        );
        describe_counter!("gateway_cache_lookups_total", "Response cache lookups");
        describe_gauge!("gateway_cache_bytes", "Bytes held by the response cache");
        describe_gauge!("gateway_cache_entries", "Entries held by the response cache");
        describe_gauge!("gateway_backend_health", "Backend health (1 healthy, 0 unhealthy)");
        describe_gauge!(
            "gateway_breaker_state",
            "Circuit breaker state (0 closed, 1 open, 2 half-open)"
        );
        describe_counter!("gateway_retries_total", "Retried backend attempts");
    });
}

/// Install the Prometheus exporter with its own HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        }
    }
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "backend" => backend.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_usage(bytes: usize, entries: usize) {
    gauge!("gateway_cache_bytes").set(bytes as f64);
    gauge!("gateway_cache_entries").set(entries as f64);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("gateway_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_breaker_state(backend: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::Open => 1.0,
        BreakerState::HalfOpen => 2.0,
    };
    gauge!("gateway_breaker_state", "backend" => backend.to_string()).set(value);
}

pub fn record_retry(backend: &str, reason: &'static str) {
    counter!("gateway_retries_total", "backend" => backend.to_string(), "reason" => reason)
        .increment(1);
}
