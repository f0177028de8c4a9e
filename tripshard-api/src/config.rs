//! API Configuration Module
//!
//! Server settings loaded from environment variables with defaults suited to
//! local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{ApiError, ApiResult};

/// Default location of the shard mapping file.
pub const DEFAULT_MAPPING_FILE: &str = "mapping.json";

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Path of the JSON shard mapping file.
    pub mapping_file: PathBuf,

    /// Interface to bind.
    pub bind_host: String,

    /// Port to listen on.
    pub port: u16,

    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    /// Apply the table DDL to every shard at startup.
    pub ensure_schema: bool,

    /// Serve `GET /metrics`.
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            mapping_file: PathBuf::from(DEFAULT_MAPPING_FILE),
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
            ensure_schema: true,
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TRIPSHARD_MAPPING_FILE` (falls back to `MAPPING_FILE`, default `mapping.json`)
    /// - `TRIPSHARD_API_BIND`: interface (default `0.0.0.0`)
    /// - `PORT` or `TRIPSHARD_API_PORT`: port (default 3000)
    /// - `TRIPSHARD_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `TRIPSHARD_CORS_MAX_AGE_SECS`: preflight cache duration (default 86400)
    /// - `TRIPSHARD_ENSURE_SCHEMA`: "false" skips schema bootstrap (default true)
    pub fn from_env() -> ApiResult<Self> {
        let defaults = Self::default();

        let mapping_file = std::env::var("TRIPSHARD_MAPPING_FILE")
            .or_else(|_| std::env::var("MAPPING_FILE"))
            .map(PathBuf::from)
            .unwrap_or(defaults.mapping_file);

        let bind_host = std::env::var("TRIPSHARD_API_BIND").unwrap_or(defaults.bind_host);

        let port = match std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("TRIPSHARD_API_PORT").ok())
        {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", raw)))?,
            None => defaults.port,
        };

        let cors_origins = std::env::var("TRIPSHARD_CORS_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or_default();

        let cors_max_age_secs = std::env::var("TRIPSHARD_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        let ensure_schema = std::env::var("TRIPSHARD_ENSURE_SCHEMA")
            .map(|s| !matches!(s.to_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(defaults.ensure_schema);

        Ok(Self {
            mapping_file,
            bind_host,
            port,
            cors_origins,
            cors_max_age_secs,
            ensure_schema,
            metrics_enabled: defaults.metrics_enabled,
        })
    }

    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect()
}
