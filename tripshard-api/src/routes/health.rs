//! Health Check Endpoints
//!
//! Kubernetes-compatible health check endpoints:
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//! - /health/ready - Connectivity check against every shard

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tripshard_storage::{PoolFactory, ShardHealth, ShardedStore};

use crate::telemetry::METRICS;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub shards: Vec<ComponentHealth>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ShardHealth> for ComponentHealth {
    fn from(health: ShardHealth) -> Self {
        Self {
            name: health.shard.to_string(),
            status: if health.healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            latency_ms: health.healthy.then_some(health.latency_ms),
            error: health.error,
        }
    }
}

// ============================================================================
// STATE
// ============================================================================

pub struct HealthState<F: PoolFactory> {
    pub store: Arc<ShardedStore<F>>,
    pub start_time: std::time::Instant,
}

impl<F: PoolFactory> HealthState<F> {
    pub fn new(store: Arc<ShardedStore<F>>) -> Self {
        Self {
            store,
            start_time: std::time::Instant::now(),
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check; 503 if any shard is unreachable
pub async fn readiness<F: PoolFactory>(
    State(state): State<Arc<HealthState<F>>>,
) -> impl IntoResponse {
    let shards: Vec<ComponentHealth> = state
        .store
        .shard_health()
        .await
        .into_iter()
        .map(ComponentHealth::from)
        .collect();

    if let Ok(metrics) = METRICS.as_ref() {
        for shard in &shards {
            metrics.set_shard_up(&shard.name, shard.status == HealthStatus::Healthy);
        }
    }

    let unhealthy = shards
        .iter()
        .filter(|s| s.status != HealthStatus::Healthy)
        .count();
    let overall_status = if unhealthy == 0 {
        HealthStatus::Healthy
    } else {
        tracing::warn!(unhealthy, "readiness check found unreachable shards");
        HealthStatus::Unhealthy
    };

    let response = HealthResponse {
        status: overall_status,
        message: (unhealthy > 0).then(|| format!("{} shard(s) unreachable", unhealthy)),
        details: Some(HealthDetails {
            shards,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    let status_code = if overall_status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router
pub fn create_router<F: PoolFactory>(store: Arc<ShardedStore<F>>) -> Router {
    let state = Arc::new(HealthState::new(store));

    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness::<F>))
        .with_state(state)
}
