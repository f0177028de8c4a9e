//! tripshard API - REST Layer and PostgreSQL Backend
//!
//! Serves the travel plan aggregate over HTTP (Axum) on top of the sharded
//! store, and provides the PostgreSQL implementation of the storage backend
//! traits, including the participants used by the `apply-all` two-phase
//! commit tool.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod telemetry;
pub mod types;
pub mod validation;

pub use config::ApiConfig;
pub use db::{ensure_schema, DbConfig, PgConnector, PgPool, PgShardFactory, SCHEMA_SQL};
pub use error::{ApiError, ApiResult, ErrorCode, FieldError};
pub use routes::create_api_router;
pub use types::*;
