//! tripshard API Server Entry Point
//!
//! Loads the shard mapping, optionally bootstraps the schema on every shard,
//! and starts the Axum HTTP server.

use std::sync::Arc;

use axum::Router;
use tripshard_api::telemetry::{init_tracing, record_locator_probes, TelemetryConfig};
use tripshard_api::{
    create_api_router, ensure_schema, ApiConfig, ApiError, ApiResult, DbConfig, PgShardFactory,
};
use tripshard_core::ShardMapping;
use tripshard_storage::ShardedStore;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig {
        metrics_enabled: telemetry_config.metrics_enabled,
        ..ApiConfig::from_env()?
    };

    let mapping = ShardMapping::load(&api_config.mapping_file)?;
    if !mapping.is_complete() {
        let missing: Vec<String> = mapping.missing_keys().iter().map(|k| k.to_string()).collect();
        return Err(ApiError::invalid_input(format!(
            "Shard mapping {} is missing keys: {}",
            api_config.mapping_file.display(),
            missing.join(", ")
        )));
    }
    tracing::info!(
        mapping_file = %api_config.mapping_file.display(),
        shards = mapping.len(),
        "Shard mapping loaded"
    );

    let db_config = DbConfig::from_env();
    let store = Arc::new(
        ShardedStore::new(Arc::new(mapping), PgShardFactory::new(db_config))
            .with_probe_recorder(record_locator_probes),
    );

    if api_config.ensure_schema {
        ensure_schema(&store)
            .await
            .map_err(|e| ApiError::internal_error(format!("Schema bootstrap failed: {}", e)))?;
    }

    let app: Router = create_api_router(store, &api_config);

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, "Starting tripshard API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
