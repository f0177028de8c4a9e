//! tripshard Telemetry - Observability Infrastructure
//!
//! Structured logging through tracing-subscriber and Prometheus metrics for
//! the API layer.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, outcome_label, record_locator_probes, TripshardMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
