//! Router-level tests for the travel plan API
//!
//! Every request goes through the full router (middleware, extractors,
//! error mapping) against the in-memory shard backend.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use tripshard_api::telemetry::{record_locator_probes, METRICS};
use tripshard_api::{create_api_router, ApiConfig};
use tripshard_test_utils::fixtures::{full_mapping, id_on_shard, memory_store, shard};
use tripshard_test_utils::{InMemoryShards, ShardedStore};

// ============================================================================
// HARNESS
// ============================================================================

fn app() -> (InMemoryShards, Router) {
    let (shards, store) = memory_store();
    (shards, create_api_router(store, &ApiConfig::default()))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request builds");

    let response = app.clone().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

async fn create_plan(app: &Router, title: &str) -> Value {
    let (status, plan) = send(
        app,
        Method::POST,
        "/api/travel-plans",
        Some(json!({ "title": title, "budget": 1500.0, "currency": "EUR" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", plan);
    plan
}

fn id_of(value: &Value) -> String {
    value["id"].as_str().expect("id present").to_string()
}

// ============================================================================
// PLANS
// ============================================================================

#[tokio::test]
async fn test_create_get_and_list_plans() {
    let (_, app) = app();

    let plan = create_plan(&app, "Lisbon long weekend").await;
    assert_eq!(plan["version"], 1);
    assert_eq!(plan["currency"], "EUR");
    let id = id_of(&plan);

    let (status, details) = send(&app, Method::GET, &format!("/api/travel-plans/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["title"], "Lisbon long weekend");
    assert_eq!(details["locations"], json!([]));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    create_plan(&app, "Porto").await;
    let (status, list) = send(&app, Method::GET, "/api/travel-plans", None).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().expect("list is an array");
    assert_eq!(list.len(), 2);
    // Most recently updated first
    assert_eq!(list[0]["title"], "Porto");
    assert_eq!(list[1]["location_count"], 0);
}

#[tokio::test]
async fn test_create_plan_defaults_currency() {
    let (_, app) = app();
    let (status, plan) = send(
        &app,
        Method::POST,
        "/api/travel-plans",
        Some(json!({ "title": "Anywhere" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(plan["currency"], "USD");
    assert_eq!(plan["is_public"], false);
}

#[tokio::test]
async fn test_create_plan_lands_on_routed_shard() {
    let (shards, app) = app();
    let plan = create_plan(&app, "Kyoto").await;
    let id = uuid::Uuid::parse_str(&id_of(&plan)).expect("uuid");

    let key = tripshard_test_utils::ShardKey::for_id(&id);
    assert!(shards.shard(key).plan(id).await.is_some());
}

#[tokio::test]
async fn test_update_plan_bumps_version_and_rejects_stale_writes() {
    let (_, app) = app();
    let plan = create_plan(&app, "Rome").await;
    let uri = format!("/api/travel-plans/{}", id_of(&plan));

    let (status, updated) = send(
        &app,
        Method::PUT,
        &uri,
        Some(json!({ "title": "Rome and Naples", "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["title"], "Rome and Naples");

    let (status, err) = send(
        &app,
        Method::PUT,
        &uri,
        Some(json!({ "title": "Stale edit", "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "VERSION_CONFLICT");
    assert_eq!(err["details"]["current_version"], 2);

    let (_, details) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(details["title"], "Rome and Naples");
}

#[tokio::test]
async fn test_delete_plan_with_and_without_version() {
    let (_, app) = app();

    let plan = create_plan(&app, "Oslo").await;
    let uri = format!("/api/travel-plans/{}", id_of(&plan));
    let (status, err) = send(&app, Method::DELETE, &format!("{}?version=7", uri), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["details"]["current_version"], 1);

    let (status, _) = send(&app, Method::DELETE, &format!("{}?version=1", uri), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, err) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "PLAN_NOT_FOUND");

    let plan = create_plan(&app, "Bergen").await;
    let uri = format!("/api/travel-plans/{}", id_of(&plan));
    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_unknown_plan_is_not_found() {
    let (_, app) = app();
    let id = id_on_shard(shard("7"));
    let (status, err) = send(&app, Method::GET, &format!("/api/travel-plans/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "PLAN_NOT_FOUND");
}

// ============================================================================
// INPUT REJECTION
// ============================================================================

#[tokio::test]
async fn test_malformed_id_is_bad_request() {
    let (_, app) = app();
    let (status, err) = send(&app, Method::GET, "/api/travel-plans/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_FORMAT");

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/locations/1234",
        Some(json!({ "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_validation_failures_list_fields() {
    let (_, app) = app();
    let (status, err) = send(
        &app,
        Method::POST,
        "/api/travel-plans",
        Some(json!({
            "title": "   ",
            "currency": "euro",
            "budget": -5.0,
            "start_date": "2025-06-10",
            "end_date": "2025-06-01"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "VALIDATION_FAILED");

    let fields: Vec<&str> = err["details"]
        .as_array()
        .expect("field list")
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    assert!(fields.contains(&"title"));
    assert!(fields.contains(&"currency"));
    assert!(fields.contains(&"budget"));
    assert!(fields.contains(&"end_date"));
}

#[tokio::test]
async fn test_undecodable_body_is_bad_request() {
    let (_, app) = app();
    let (status, err) = send(
        &app,
        Method::POST,
        "/api/travel-plans",
        Some(json!({ "description": "no title" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_INPUT");
}

// ============================================================================
// LOCATIONS
// ============================================================================

#[tokio::test]
async fn test_add_location_appends_and_bumps_plan_version() {
    let (_, app) = app();
    let plan = create_plan(&app, "Tokyo").await;
    let uri = format!("/api/travel-plans/{}/locations", id_of(&plan));

    let (status, first) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({ "name": "Shinjuku", "latitude": 35.6938, "longitude": 139.7034, "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["visit_order"], 1);
    assert_eq!(first["plan_version"], 2);

    let (status, second) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({ "name": "Asakusa", "version": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["visit_order"], 2);
    assert_eq!(second["plan_version"], 3);

    let (_, details) = send(&app, Method::GET, &format!("/api/travel-plans/{}", id_of(&plan)), None).await;
    assert_eq!(details["version"], 3);
    let names: Vec<&str> = details["locations"]
        .as_array()
        .expect("locations")
        .iter()
        .filter_map(|l| l["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Shinjuku", "Asakusa"]);
}

#[tokio::test]
async fn test_taken_visit_order_is_conflict() {
    let (_, app) = app();
    let plan = create_plan(&app, "Madrid").await;
    let uri = format!("/api/travel-plans/{}/locations", id_of(&plan));

    let (status, _) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({ "name": "Prado", "visit_order": 1, "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, err) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({ "name": "Retiro", "visit_order": 1, "version": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "ORDER_CONFLICT");
    assert_eq!(err["details"]["requested_order"], 1);

    // The rejected write leaves the version alone
    let (_, details) = send(&app, Method::GET, &format!("/api/travel-plans/{}", id_of(&plan)), None).await;
    assert_eq!(details["version"], 2);
}

#[tokio::test]
async fn test_add_location_with_stale_version_is_conflict() {
    let (_, app) = app();
    let plan = create_plan(&app, "Paris").await;
    let (status, err) = send(
        &app,
        Method::POST,
        &format!("/api/travel-plans/{}/locations", id_of(&plan)),
        Some(json!({ "name": "Louvre", "version": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["details"]["current_version"], 1);
}

#[tokio::test]
async fn test_location_update_and_delete_through_locator() {
    let (shards, store) = memory_store();
    let writer = create_api_router(store, &ApiConfig::default());

    let plan = create_plan(&writer, "Berlin").await;
    let (_, location) = send(
        &writer,
        Method::POST,
        &format!("/api/travel-plans/{}/locations", id_of(&plan)),
        Some(json!({ "name": "Museum Island", "version": 1 })),
    )
    .await;
    let location_uri = format!("/api/locations/{}", id_of(&location));

    // A second instance over the same shards has no placement hints
    let cold = Arc::new(ShardedStore::new(Arc::new(full_mapping()), shards.clone()));
    let reader = create_api_router(cold, &ApiConfig::default());

    let (status, patched) = send(
        &reader,
        Method::PUT,
        &location_uri,
        Some(json!({ "notes": "closed on mondays", "version": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["notes"], "closed on mondays");
    assert_eq!(patched["name"], "Museum Island");
    assert_eq!(patched["plan_version"], 3);

    let (status, err) = send(&reader, Method::DELETE, &location_uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "VALIDATION_FAILED");

    let (status, _) = send(&reader, Method::DELETE, &format!("{}?version=3", location_uri), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, err) = send(&writer, Method::DELETE, &format!("{}?version=4", location_uri), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "LOCATION_NOT_FOUND");

    let (_, details) = send(&writer, Method::GET, &format!("/api/travel-plans/{}", id_of(&plan)), None).await;
    assert_eq!(details["version"], 4);
    assert_eq!(details["locations"], json!([]));
}

#[tokio::test]
async fn test_deleting_plan_removes_its_locations() {
    let (shards, app) = app();
    let plan = create_plan(&app, "Vienna").await;
    let (_, location) = send(
        &app,
        Method::POST,
        &format!("/api/travel-plans/{}/locations", id_of(&plan)),
        Some(json!({ "name": "Belvedere", "version": 1 })),
    )
    .await;

    let (status, _) = send(&app, Method::DELETE, &format!("/api/travel-plans/{}", id_of(&plan)), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let plan_id = uuid::Uuid::parse_str(&id_of(&plan)).expect("uuid");
    let key = tripshard_test_utils::ShardKey::for_id(&plan_id);
    assert_eq!(shards.shard(key).location_count().await, 0);

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/locations/{}", id_of(&location)),
        Some(json!({ "name": "Gone", "version": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// HEALTH & METRICS
// ============================================================================

#[tokio::test]
async fn test_readiness_reports_unreachable_shard() {
    let (shards, app) = app();

    let (status, body) = send(&app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["details"]["shards"].as_array().map(Vec::len), Some(16));

    shards.shard(shard("a")).set_unavailable(true);
    let (status, body) = send(&app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    let down: Vec<&Value> = body["details"]["shards"]
        .as_array()
        .expect("shards")
        .iter()
        .filter(|s| s["status"] == "unhealthy")
        .collect();
    assert_eq!(down.len(), 1);
    assert_eq!(down[0]["name"], "a");
}

#[tokio::test]
async fn test_unavailable_shard_is_service_unavailable() {
    let (shards, app) = app();
    let id = id_on_shard(shard("3"));
    shards.shard(shard("3")).set_unavailable(true);

    let (status, err) = send(&app, Method::GET, &format!("/api/travel-plans/{}", id), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(err["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_ping_and_metrics() {
    let (_, app) = app();
    let (status, body) = send(&app, Method::GET, "/health/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("pong".to_string()));

    let plan = create_plan(&app, "Metrics").await;
    send(
        &app,
        Method::PUT,
        &format!("/api/travel-plans/{}", id_of(&plan)),
        Some(json!({ "title": "Metrics", "version": 9 })),
    )
    .await;

    let (status, body) = send(&app, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap_or_default();
    assert!(text.contains("tripshard_guarded_writes_total"));
    assert!(text.contains("version_conflict"));
}

#[tokio::test]
async fn test_metrics_route_can_be_disabled() {
    let (_, store) = memory_store();
    let config = ApiConfig {
        metrics_enabled: false,
        ..ApiConfig::default()
    };
    let app = create_api_router(store, &config);
    let (status, _) = send(&app, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_append_after_last_possible_order_is_unprocessable() {
    let (_, app) = app();
    let plan = create_plan(&app, "Endless").await;
    let uri = format!("/api/travel-plans/{}/locations", id_of(&plan));

    let (status, _) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({ "name": "Last", "visit_order": i32::MAX, "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, err) = send(&app, Method::POST, &uri, Some(json!({ "name": "After", "version": 2 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "CONSTRAINT_VIOLATION");

    let (_, details) = send(&app, Method::GET, &format!("/api/travel-plans/{}", id_of(&plan)), None).await;
    assert_eq!(details["version"], 2);
}

#[tokio::test]
async fn test_patch_departing_before_arrival_is_unprocessable() {
    let (_, app) = app();
    let plan = create_plan(&app, "Hakone").await;
    let (_, location) = send(
        &app,
        Method::POST,
        &format!("/api/travel-plans/{}/locations", id_of(&plan)),
        Some(json!({
            "name": "Onsen",
            "arrival_date": "2025-04-01T15:00:00Z",
            "departure_date": "2025-04-03T10:00:00Z",
            "version": 1
        })),
    )
    .await;

    let (status, err) = send(
        &app,
        Method::PUT,
        &format!("/api/locations/{}", id_of(&location)),
        Some(json!({ "departure_date": "2025-03-30T10:00:00Z", "version": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "CONSTRAINT_VIOLATION");
}

#[tokio::test]
async fn test_locator_misses_are_counted() -> Result<(), String> {
    let store = ShardedStore::new(Arc::new(full_mapping()), InMemoryShards::new())
        .with_probe_recorder(record_locator_probes);
    let app = create_api_router(Arc::new(store), &ApiConfig::default());
    let metrics = METRICS.as_ref().map_err(|e| e.message.clone())?;

    let before = metrics.locator_probes.get_sample_sum();
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/locations/{}", uuid::Uuid::new_v4()),
        Some(json!({ "name": "Nowhere", "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(metrics.locator_probes.get_sample_sum() >= before + 16.0);
    Ok(())
}

#[tokio::test]
async fn test_cors_allows_only_configured_origins() {
    let (_, store) = memory_store();
    let config = ApiConfig {
        cors_origins: vec!["https://plans.example".to_string()],
        ..ApiConfig::default()
    };
    let app = create_api_router(store, &config);

    for (origin, allowed) in [("https://plans.example", true), ("https://evil.example", false)] {
        let request = Request::builder()
            .uri("/health/ping")
            .header("origin", origin)
            .body(Body::empty())
            .expect("request builds");
        let response = app.clone().oneshot(request).await.expect("router is infallible");
        let header = response.headers().get("access-control-allow-origin");
        assert_eq!(header.is_some(), allowed, "origin {}", origin);
    }
}
