//! Error Types for the tripshard API
//!
//! This module defines error handling for the HTTP layer:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//! - Conversions from storage, configuration and extractor errors
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tripshard_core::{ConfigError, EntityType, StorageError};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// One or more fields failed validation
    ValidationFailed,

    /// Request body or query could not be decoded
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested travel plan does not exist
    PlanNotFound,

    /// Requested location does not exist
    LocationNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Plan was modified since the caller read it
    VersionConflict,

    /// Visit order already used within the plan
    OrderConflict,

    // ========================================================================
    // Unprocessable (422)
    // ========================================================================
    /// The write would break a stored invariant of the plan
    ConstraintViolation,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Identifier routes to a shard that is not configured
    ShardNotConfigured,

    /// A shard could not be reached or failed the operation
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::InvalidFormat => {
                StatusCode::BAD_REQUEST
            }

            ErrorCode::PlanNotFound | ErrorCode::LocationNotFound => StatusCode::NOT_FOUND,

            ErrorCode::VersionConflict | ErrorCode::OrderConflict => StatusCode::CONFLICT,

            ErrorCode::ConstraintViolation => StatusCode::UNPROCESSABLE_ENTITY,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError | ErrorCode::ShardNotConfigured => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::PlanNotFound => "Travel plan not found",
            ErrorCode::LocationNotFound => "Location not found",
            ErrorCode::VersionConflict => "Travel plan was modified by another user",
            ErrorCode::OrderConflict => "Visit order is already taken",
            ErrorCode::ConstraintViolation => "The change would leave the plan invalid",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ShardNotConfigured => "No shard configured for this identifier",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional machine-readable details (field errors, current version, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    /// Validation failure carrying the list of offending fields.
    pub fn validation_failed(errors: Vec<FieldError>) -> Self {
        let details = serde_json::to_value(&errors).unwrap_or(serde_json::Value::Null);
        Self::from_code(ErrorCode::ValidationFailed).with_details(details)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_input(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::invalid_input(rejection.body_text())
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::NotFound {
                entity_type: EntityType::Plan,
                ..
            } => ApiError::new(ErrorCode::PlanNotFound, message),
            StorageError::NotFound {
                entity_type: EntityType::Location,
                ..
            } => ApiError::new(ErrorCode::LocationNotFound, message),
            StorageError::VersionConflict {
                current_version, ..
            } => ApiError::new(ErrorCode::VersionConflict, message)
                .with_details(serde_json::json!({ "current_version": current_version })),
            StorageError::OrderConflict {
                requested_order, ..
            } => ApiError::new(ErrorCode::OrderConflict, message)
                .with_details(serde_json::json!({ "requested_order": requested_order })),
            StorageError::ConstraintViolation { .. } => {
                ApiError::new(ErrorCode::ConstraintViolation, message)
            }
            StorageError::UnknownShard { key } => {
                tracing::error!(shard = %key, "identifier routed to unconfigured shard");
                ApiError::from_code(ErrorCode::ShardNotConfigured)
            }
            StorageError::Infrastructure { reason } => {
                // Full detail stays in the logs
                tracing::error!(reason = %reason, "storage infrastructure failure");
                ApiError::from_code(ErrorCode::ServiceUnavailable)
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_format("id", &format!("valid UUID: {}", err))
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
