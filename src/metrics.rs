//! Prometheus counters for the refresh loops and the lookup endpoints.
//!
//! Without the `server` feature every recorder is a no-op, so library users
//! pay nothing for the calls sprinkled through the pipeline.

#[cfg(feature = "server")]
use axum::{http::StatusCode, response::IntoResponse};
#[cfg(feature = "server")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "server")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "server")]
use std::sync::OnceLock;
use std::time::Duration;

#[cfg(feature = "server")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[cfg(feature = "server")]
pub fn init_metrics() {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Metrics recorder already installed");
                return;
            }

            counter!("sentinel_probes_total", "outcome" => "https").absolute(0);
            counter!("sentinel_refresh_total", "loop" => "feed", "outcome" => "ok").absolute(0);
            counter!("sentinel_refresh_total", "loop" => "health", "outcome" => "ok").absolute(0);
            counter!("sentinel_cache_hits_total", "kind" => "whois").absolute(0);
            counter!("sentinel_cache_misses_total", "kind" => "whois").absolute(0);
            counter!("sentinel_rate_limited_total").absolute(0);
            gauge!("sentinel_domains").set(0.0);
            histogram!("sentinel_health_cycle_seconds").record(0.0);
        }
        Err(e) => {
            tracing::error!("Failed to install metrics recorder: {}", e);
        }
    }
}

#[cfg(not(feature = "server"))]
pub fn init_metrics() {}

#[cfg(feature = "server")]
pub fn increment_probes(outcome: &str) {
    counter!("sentinel_probes_total", "outcome" => outcome.to_string()).increment(1);
}

#[cfg(feature = "server")]
pub fn record_refresh(loop_name: &str, outcome: &str) {
    counter!(
        "sentinel_refresh_total",
        "loop" => loop_name.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[cfg(feature = "server")]
pub fn record_health_cycle(elapsed: Duration) {
    histogram!("sentinel_health_cycle_seconds").record(elapsed.as_secs_f64());
}

#[cfg(feature = "server")]
pub fn set_domain_count(count: usize) {
    gauge!("sentinel_domains").set(count as f64);
}

#[cfg(feature = "server")]
pub fn increment_cache_hits(kind: &str) {
    counter!("sentinel_cache_hits_total", "kind" => kind.to_string()).increment(1);
}

#[cfg(feature = "server")]
pub fn increment_cache_misses(kind: &str) {
    counter!("sentinel_cache_misses_total", "kind" => kind.to_string()).increment(1);
}

#[cfg(feature = "server")]
pub fn increment_rate_limited() {
    counter!("sentinel_rate_limited_total").increment(1);
}

#[cfg(not(feature = "server"))]
pub fn increment_probes(_outcome: &str) {}

#[cfg(not(feature = "server"))]
pub fn record_refresh(_loop_name: &str, _outcome: &str) {}

#[cfg(not(feature = "server"))]
pub fn record_health_cycle(_elapsed: Duration) {}

#[cfg(not(feature = "server"))]
pub fn set_domain_count(_count: usize) {}

#[cfg(not(feature = "server"))]
pub fn increment_cache_hits(_kind: &str) {}

#[cfg(not(feature = "server"))]
pub fn increment_cache_misses(_kind: &str) {}

#[cfg(not(feature = "server"))]
pub fn increment_rate_limited() {}

#[cfg(feature = "server")]
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized".to_string()),
    }
}
