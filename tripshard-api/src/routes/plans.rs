//! Travel Plan REST API Routes
//!
//! Plan CRUD plus location creation under a plan. Writes to an existing plan
//! carry the version the caller last read.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tripshard_storage::{PoolFactory, ShardedStore};

use super::{parse_id, record_guarded};
use crate::{
    error::ApiResult,
    types::{CreateLocationRequest, CreatePlanRequest, LocationResponse, UpdatePlanRequest, VersionQuery},
    validation::Validate,
};

// ============================================================================
// SHARED STATE
// ============================================================================

/// Shared state for plan routes.
pub struct PlanState<F: PoolFactory> {
    pub store: Arc<ShardedStore<F>>,
}

impl<F: PoolFactory> PlanState<F> {
    pub fn new(store: Arc<ShardedStore<F>>) -> Self {
        Self { store }
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/travel-plans - Every plan with its location count, newest first
pub async fn list_plans<F: PoolFactory>(
    State(state): State<Arc<PlanState<F>>>,
) -> ApiResult<impl IntoResponse> {
    let plans = state.store.list_plans().await?;
    Ok(Json(plans))
}

/// POST /api/travel-plans - Create a plan at version 1
pub async fn create_plan<F: PoolFactory>(
    State(state): State<Arc<PlanState<F>>>,
    payload: Result<Json<CreatePlanRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    req.validate()?;

    let plan = state.store.create_plan(req.into_fields()).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// GET /api/travel-plans/:id - Plan with its ordered locations
pub async fn get_plan<F: PoolFactory>(
    State(state): State<Arc<PlanState<F>>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let plan_id = parse_id(&id)?;
    let details = state.store.get_plan(plan_id).await?;
    Ok(Json(details))
}

/// PUT /api/travel-plans/:id - Replace editable fields
pub async fn update_plan<F: PoolFactory>(
    State(state): State<Arc<PlanState<F>>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdatePlanRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let plan_id = parse_id(&id)?;
    let Json(req) = payload?;
    req.validate()?;

    let (version, fields) = req.into_parts();
    let result = state.store.update_plan(plan_id, version, fields).await;
    record_guarded("update_plan", &result);
    Ok(Json(result?))
}

/// DELETE /api/travel-plans/:id[?version=N] - Delete a plan and its locations
pub async fn delete_plan<F: PoolFactory>(
    State(state): State<Arc<PlanState<F>>>,
    Path(id): Path<String>,
    query: Result<Query<VersionQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let plan_id = parse_id(&id)?;
    let Query(query) = query?;

    let result = state.store.delete_plan(plan_id, query.version).await;
    record_guarded("delete_plan", &result);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/travel-plans/:id/locations - Add a location to the plan
pub async fn add_location<F: PoolFactory>(
    State(state): State<Arc<PlanState<F>>>,
    Path(id): Path<String>,
    payload: Result<Json<CreateLocationRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let plan_id = parse_id(&id)?;
    let Json(req) = payload?;
    req.validate()?;

    let (version, new) = req.into_parts();
    let result = state.store.add_location(plan_id, version, new).await;
    record_guarded("create_location", &result);
    let written = result?;

    Ok((
        StatusCode::CREATED,
        Json(LocationResponse {
            location: written.location,
            plan_version: written.plan_version,
        }),
    ))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router<F: PoolFactory>(store: Arc<ShardedStore<F>>) -> Router {
    let state = Arc::new(PlanState::new(store));

    Router::new()
        .route("/", get(list_plans::<F>).post(create_plan::<F>))
        .route(
            "/:id",
            get(get_plan::<F>)
                .put(update_plan::<F>)
                .delete(delete_plan::<F>),
        )
        .route("/:id/locations", post(add_location::<F>))
        .with_state(state)
}
