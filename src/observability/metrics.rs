//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (acquisition, statements, pool saturation)
//! - Expose a Prometheus scrape endpoint
//! - Track per-target series via a `target` label
//!
//! # Metrics
//! - `gateway_acquire_duration_seconds` (histogram): checkout plus probe latency
//! - `gateway_acquire_timeouts_total` (counter): acquisitions that hit the ceiling
//! - `gateway_statement_duration_seconds` (histogram): by target and outcome
//! - `gateway_statement_timeouts_total` (counter): statements past their deadline
//! - `gateway_pool_in_use` / `gateway_pool_open` (gauge): per-pool connection counts
//! - `gateway_pool_saturation_ratio` (gauge): in_use / max, 0.0 to 1.0
//! - `gateway_watchdog_consecutive_exhaustion` (gauge): watchdog counter
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder
//!   installed every call is a no-op, so tests need no setup

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::driver::PoolSnapshot;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_acquire(target: &str, elapsed: Duration) {
    histogram!("gateway_acquire_duration_seconds", "target" => target.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_acquire_timeout(target: &str) {
    counter!("gateway_acquire_timeouts_total", "target" => target.to_string()).increment(1);
}

/// `outcome` is one of `ok`, `error`, `timeout`.
pub fn record_statement(target: &str, elapsed: Duration, outcome: &'static str) {
    histogram!(
        "gateway_statement_duration_seconds",
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_statement_timeout(target: &str) {
    counter!("gateway_statement_timeouts_total", "target" => target.to_string()).increment(1);
}

pub fn record_pool(snapshot: &PoolSnapshot) {
    let alias = snapshot.alias.clone();
    gauge!("gateway_pool_in_use", "target" => alias.clone()).set(snapshot.in_use as f64);
    gauge!("gateway_pool_open", "target" => alias.clone()).set(snapshot.open as f64);
    let ratio = if snapshot.max == 0 {
        0.0
    } else {
        snapshot.in_use as f64 / snapshot.max as f64
    };
    gauge!("gateway_pool_saturation_ratio", "target" => alias).set(ratio);
}

pub fn record_watchdog(consecutive: u32) {
    gauge!("gateway_watchdog_consecutive_exhaustion").set(f64::from(consecutive));
}
