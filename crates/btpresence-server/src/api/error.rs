//! API error types and response handling.
//!
//! Handlers return [`ApiResult`]; every error renders as an
//! [`ErrorResponse`] JSON body with a matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::ServiceError;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "entity_not_found",
    "message": "No state for entity: light.kitchen"
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "entity_not_found")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "No state for entity: light.kitchen")]
    pub message: String,
}

impl ApiError {
    /// 404 for an entity without state.
    #[must_use]
    pub fn entity_not_found(entity_id: &str) -> Self {
        Self::NotFound {
            error_code: "entity_not_found".to_string(),
            message: format!("No state for entity: {entity_id}"),
        }
    }

    /// Status code of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (Self::BadRequest { error_code, message } | Self::NotFound { error_code, message }) =
            self;
        let body = ErrorResponse {
            error: error_code,
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound { .. } => Self::NotFound {
                error_code: "service_not_found".to_string(),
                message: err.to_string(),
            },
            ServiceError::InvalidData(_) => Self::BadRequest {
                error_code: "invalid_service_data".to_string(),
                message: err.to_string(),
            },
        }
    }
}
