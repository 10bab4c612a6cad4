//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_accepted_total` (counter)
//! - `proxy_active_connections` (gauge)
//! - `proxy_cache_lookups_total` (counter): by `result` = hit | miss
//! - `proxy_cache_entries` (gauge)
//! - `proxy_cache_evictions_total` (counter)
//! - `proxy_fetches_total` (counter): by `outcome`
//! - `proxy_fetch_duration_seconds` (histogram)
//! - `proxy_pool_saturated_total` (counter): jobs that had to queue
//! - `proxy_requests_rejected_total` (counter): by `reason`

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_accepted() {
    metrics::counter!("proxy_connections_accepted_total").increment(1);
}

pub fn record_active_connections(count: usize) {
    metrics::gauge!("proxy_active_connections").set(count as f64);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    metrics::gauge!("proxy_cache_entries").set(entries as f64);
}

pub fn record_cache_eviction() {
    metrics::counter!("proxy_cache_evictions_total").increment(1);
}

pub fn record_fetch(outcome: &'static str, start: Instant) {
    metrics::counter!("proxy_fetches_total", "outcome" => outcome).increment(1);
    metrics::histogram!("proxy_fetch_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_pool_saturated() {
    metrics::counter!("proxy_pool_saturated_total").increment(1);
}

pub fn record_request_rejected(reason: &'static str) {
    metrics::counter!("proxy_requests_rejected_total", "reason" => reason).increment(1);
}
