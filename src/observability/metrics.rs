//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define control plane metrics (selections, backend health, scaling)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `lb_selections_total` (counter): selections by algorithm and backend
//! - `lb_no_backend_total` (counter): selections that found no healthy backend
//! - `lb_backend_health` (gauge): 1=healthy, 0=unhealthy or draining
//! - `lb_backend_connections` (gauge): open connections per backend
//! - `lb_health_check_duration_seconds` (histogram): duration of a full round
//! - `lb_health_check_results` (gauge): healthy/unhealthy count of the last round
//! - `lb_scaling_actions_total` (counter): scale actions by direction
//! - `lb_instances` (gauge): non-draining instances
//! - `lb_circuit_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_selection(algorithm: &'static str, backend: &str) {
    counter!(
        "lb_selections_total",
        "algorithm" => algorithm,
        "backend" => backend.to_string()
    )
    .increment(1);
}

pub fn record_no_backend(algorithm: &'static str) {
    counter!("lb_no_backend_total", "algorithm" => algorithm).increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("lb_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_backend_connections(backend: &str, connections: usize) {
    gauge!("lb_backend_connections", "backend" => backend.to_string()).set(connections as f64);
}

/// Zero the per-backend gauges of a deleted server.
pub fn clear_backend(backend: &str) {
    gauge!("lb_backend_health", "backend" => backend.to_string()).set(0.0);
    gauge!("lb_backend_connections", "backend" => backend.to_string()).set(0.0);
}

pub fn record_health_round(elapsed: Duration, healthy: usize, unhealthy: usize) {
    histogram!("lb_health_check_duration_seconds").record(elapsed.as_secs_f64());
    gauge!("lb_health_check_results", "result" => "healthy").set(healthy as f64);
    gauge!("lb_health_check_results", "result" => "unhealthy").set(unhealthy as f64);
}

pub fn record_scaling_action(direction: &'static str) {
    counter!("lb_scaling_actions_total", "direction" => direction).increment(1);
}

pub fn record_instances(count: usize) {
    gauge!("lb_instances").set(count as f64);
}

pub fn record_circuit_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!("lb_circuit_breaker_state", "breaker" => name.to_string()).set(value);
}
