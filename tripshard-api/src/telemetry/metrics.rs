//! Prometheus Metrics Definitions
//!
//! Request, guarded-write, locator and shard health metrics. Exposed on
//! `/metrics` for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_histogram_vec,
    CounterVec, Encoder, GaugeVec, Histogram, HistogramVec, TextEncoder,
};
use tripshard_core::{StorageError, StorageResult};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Shards probed per location lookup, one bucket per possible count.
const PROBE_BUCKETS: &[f64] = &[
    1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<TripshardMetrics>> = Lazy::new(TripshardMetrics::new);

/// Container for all tripshard metrics.
#[derive(Clone)]
pub struct TripshardMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Guarded aggregate writes - labels: kind, outcome
    pub guarded_writes_total: CounterVec,

    /// Shards probed to resolve a location id
    pub locator_probes: Histogram,

    /// 1 when the last readiness check reached the shard - labels: shard
    pub shard_up: GaugeVec,
}

impl TripshardMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "tripshard_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "tripshard_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            guarded_writes_total: register_counter_vec!(
                "tripshard_guarded_writes_total",
                "Aggregate writes through the optimistic version guard",
                &["kind", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register guarded_writes_total: {}", e)))?,

            locator_probes: register_histogram!(
                "tripshard_locator_probes",
                "Shards probed to resolve a location by id",
                PROBE_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register locator_probes: {}", e)))?,

            shard_up: register_gauge_vec!(
                "tripshard_shard_up",
                "Whether the shard answered the last readiness check",
                &["shard"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register shard_up: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record the outcome of a guarded write.
    pub fn record_guarded<T>(&self, kind: &str, result: &StorageResult<T>) {
        self.guarded_writes_total
            .with_label_values(&[kind, outcome_label(result)])
            .inc();
    }

    /// Record a location lookup that needed `probes` shard queries. Routed
    /// writes report zero probes and are not recorded.
    pub fn record_probes(&self, probes: usize) {
        if probes > 0 {
            self.locator_probes.observe(probes as f64);
        }
    }

    pub fn set_shard_up(&self, shard: &str, up: bool) {
        self.shard_up
            .with_label_values(&[shard])
            .set(if up { 1.0 } else { 0.0 });
    }
}

/// Probe recorder for the store's locator.
pub fn record_locator_probes(probes: usize) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_probes(probes);
    }
}

/// Metric label for a storage outcome.
pub fn outcome_label<T>(result: &StorageResult<T>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(StorageError::VersionConflict { .. }) => "version_conflict",
        Err(StorageError::OrderConflict { .. }) => "order_conflict",
        Err(StorageError::NotFound { .. }) => "not_found",
        Err(StorageError::ConstraintViolation { .. }) => "constraint_violation",
        Err(StorageError::UnknownShard { .. }) | Err(StorageError::Infrastructure { .. }) => {
            "error"
        }
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;
    use uuid::Uuid;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_guarded_outcomes() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let conflict: StorageResult<()> = Err(StorageError::VersionConflict {
            plan_id: Uuid::nil(),
            current_version: 3,
        });
        let before = metrics
            .guarded_writes_total
            .with_label_values(&["update_plan", "version_conflict"])
            .get();
        metrics.record_guarded("update_plan", &conflict);
        let after = metrics
            .guarded_writes_total
            .with_label_values(&["update_plan", "version_conflict"])
            .get();
        assert!(after >= before + 1.0);
        Ok(())
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label::<()>(&Ok(())), "accepted");
        assert_eq!(
            outcome_label::<()>(&Err(StorageError::plan_not_found(Uuid::nil()))),
            "not_found"
        );
        assert_eq!(
            outcome_label::<()>(&Err(StorageError::infrastructure("down"))),
            "error"
        );
        assert_eq!(
            outcome_label::<()>(&Err(StorageError::constraint_violation("dates"))),
            "constraint_violation"
        );
    }

    #[test]
    fn test_probe_histogram_skips_routed_writes() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let before = metrics.locator_probes.get_sample_count();
        metrics.record_probes(0);
        metrics.record_probes(6);
        assert!(metrics.locator_probes.get_sample_count() >= before + 1);
        Ok(())
    }
}
