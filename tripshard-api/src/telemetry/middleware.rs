//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span, records Prometheus request metrics
//! and logs completion.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;

static UUID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .ok()
});

static NUMERIC_ID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/\d+(/|$)").ok());

/// Normalize path for metrics/spans (replace UUIDs and IDs with placeholders).
///
/// This prevents high-cardinality label explosion in Prometheus.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut result = path.to_string();
    if let Some(pattern) = UUID_PATTERN.as_ref() {
        result = pattern.replace_all(&result, "{id}").into_owned();
    }
    if let Some(pattern) = NUMERIC_ID_PATTERN.as_ref() {
        result = pattern.replace_all(&result, "/{id}$1").into_owned();
    }
    result
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}
