//! Tracing Subscriber Initialization
//!
//! Installs a global subscriber with an `EnvFilter` and either JSON lines
//! (for log shipping) or human-readable output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "tripshard_api=debug,tripshard_storage=debug,tower_http=debug,info";

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// `"pretty"` (any case) selects human-readable output; anything else is JSON.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("pretty") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Enable metrics collection
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("TRIPSHARD_SERVICE_NAME")
                .unwrap_or_else(|_| "tripshard-api".to_string()),
            service_version: std::env::var("TRIPSHARD_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            environment: std::env::var("TRIPSHARD_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            log_format: std::env::var("TRIPSHARD_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(LogFormat::Json),
            metrics_enabled: std::env::var("TRIPSHARD_METRICS_ENABLED")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(true),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup before anything logs. A second call fails.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        environment = config.environment,
        log_format = ?config.log_format,
        "Telemetry initialized"
    );

    Ok(())
}
