//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_filter_executions_total` (counter): filter runs by type, name, outcome
//! - `gateway_filter_duration_seconds` (histogram): per-filter run latency
//! - `gateway_compile_failures_total` (counter): failed compilations by type
//! - `gateway_poll_cycles_total` (counter): poll cycles by poller, outcome
//! - `gateway_registry_filters` (gauge): entries in the current snapshot
//! - `gateway_shadow_executions_total` (counter): canary runs, diverged or not
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Prometheus exposition is opt-in via `observability.metrics_enabled`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Record one filter invocation that actually ran.
pub fn record_filter_execution(filter_type: &str, filter_name: &str, outcome: &'static str, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    counter!(
        "gateway_filter_executions_total",
        "type" => filter_type.to_string(),
        "filter" => filter_name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "gateway_filter_duration_seconds",
        "type" => filter_type.to_string(),
        "filter" => filter_name.to_string()
    )
    .record(elapsed);
}

pub fn record_compile_failure(filter_type: &str) {
    counter!("gateway_compile_failures_total", "type" => filter_type.to_string()).increment(1);
}

pub fn record_poll_cycle(poller: &'static str, outcome: &'static str) {
    counter!("gateway_poll_cycles_total", "poller" => poller, "outcome" => outcome).increment(1);
}

pub fn record_registry_size(entries: usize) {
    gauge!("gateway_registry_filters").set(entries as f64);
}

pub fn record_shadow_execution(filter_name: &str, diverged: bool) {
    counter!(
        "gateway_shadow_executions_total",
        "filter" => filter_name.to_string(),
        "diverged" => if diverged { "true" } else { "false" }
    )
    .increment(1);
}
