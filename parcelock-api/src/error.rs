//! Error types for the HTTP layer
//!
//! Status mapping:
//! - caller sent something unusable → 400
//! - no record for the tag → 404
//! - reader or servo failed → 503 (reads and writes alike)
//! - record store failed → 500

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::error;

use crate::hardware::HardwareError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Field-level validation failures (400), keyed by field name
    #[error("Validation failed: {0:?}")]
    Validation(Map<String, Value>),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Physical device failure (503)
    #[error("Hardware unavailable: {0}")]
    Hardware(String),

    /// Record store failure (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<HardwareError> for ApiError {
    fn from(err: HardwareError) -> Self {
        ApiError::Hardware(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Validation(fields) => (StatusCode::BAD_REQUEST, Value::Object(fields)),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Hardware(msg) => {
                error!("Hardware failure: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
            ApiError::Database(ref err) => {
                error!("Database failure: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": format!("Database error: {}", err) }),
                )
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
