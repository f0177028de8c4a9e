//! Location REST API Routes
//!
//! Locations addressed by id alone. The owning shard is unknown up front, so
//! every request here goes through the scatter-gather locator, which reports
//! its probe counts to the store's recorder.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::put,
    Json, Router,
};
use std::sync::Arc;
use tripshard_storage::{PoolFactory, ShardedStore};

use super::{parse_id, record_guarded};
use crate::{
    error::{ApiError, ApiResult, FieldError},
    types::{LocationResponse, UpdateLocationRequest, VersionQuery},
    validation::Validate,
};

/// Shared state for location routes.
pub struct LocationState<F: PoolFactory> {
    pub store: Arc<ShardedStore<F>>,
}

impl<F: PoolFactory> LocationState<F> {
    pub fn new(store: Arc<ShardedStore<F>>) -> Self {
        Self { store }
    }
}

/// PUT /api/locations/:id - Patch the supplied fields of a location
pub async fn update_location<F: PoolFactory>(
    State(state): State<Arc<LocationState<F>>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateLocationRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let location_id = parse_id(&id)?;
    let Json(req) = payload?;
    req.validate()?;

    let (version, patch) = req.into_parts();
    let result = state.store.update_location(location_id, version, patch).await;
    record_guarded("update_location", &result);
    let written = result?;

    Ok(Json(LocationResponse {
        location: written.location,
        plan_version: written.plan_version,
    }))
}

/// DELETE /api/locations/:id?version=N - Remove a location from its plan
pub async fn delete_location<F: PoolFactory>(
    State(state): State<Arc<LocationState<F>>>,
    Path(id): Path<String>,
    query: Result<Query<VersionQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let location_id = parse_id(&id)?;
    let Query(query) = query?;
    let version = query.version.ok_or_else(|| {
        ApiError::validation_failed(vec![FieldError::new("version", "is required")])
    })?;

    let result = state.store.delete_location(location_id, version).await;
    record_guarded("delete_location", &result);
    result?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn create_router<F: PoolFactory>(store: Arc<ShardedStore<F>>) -> Router {
    let state = Arc::new(LocationState::new(store));

    Router::new()
        .route(
            "/:id",
            put(update_location::<F>).delete(delete_location::<F>),
        )
        .with_state(state)
}
