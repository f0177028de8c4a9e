//! REST API Routes Module
//!
//! Route handlers organized by resource:
//! - Travel plans and their nested locations
//! - Locations addressed by id alone
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics
//!
//! Handlers are generic over the shard backend so the same router serves
//! PostgreSQL in production and the in-memory backend in tests.

pub mod health;
pub mod locations;
pub mod plans;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tripshard_core::{EntityId, StorageResult};
use tripshard_storage::{PoolFactory, ShardedStore};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::telemetry::{metrics_handler, observability_middleware, METRICS};

pub use health::create_router as health_router;
pub use locations::create_router as location_router;
pub use plans::create_router as plan_router;

/// Parse a path segment as a UUID, answering 400 when it is not one.
pub(crate) fn parse_id(raw: &str) -> ApiResult<EntityId> {
    Ok(Uuid::parse_str(raw)?)
}

pub(crate) fn record_guarded<T>(kind: &str, result: &StorageResult<T>) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_guarded(kind, result);
    }
}

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        // Development mode: allow all origins
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Create the complete API router.
pub fn create_api_router<F: PoolFactory>(
    store: Arc<ShardedStore<F>>,
    api_config: &ApiConfig,
) -> Router {
    let api_routes = Router::new()
        .nest("/travel-plans", plans::create_router(store.clone()))
        .nest("/locations", locations::create_router(store.clone()));

    let mut router = Router::new()
        .nest("/api", api_routes)
        .nest("/health", health::create_router(store));
    if api_config.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(api_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_id_rejects_garbage() {
        let err = parse_id("not-a-uuid").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
        assert!(parse_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
    }
}
