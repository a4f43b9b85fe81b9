//! Unified API error handling with structured responses.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::debug;

use crate::auth::{AuthError, AuthErrorResponse};

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed body or query string.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Authentication failures keep their own codes.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(err) => err.into_response(),
            ApiError::BadRequest(message) => {
                debug!(error_code = "bad_request", message = %message, "Client error");

                let body = AuthErrorResponse {
                    success: false,
                    error: format!("Bad request: {message}"),
                    code: "bad_request".to_string(),
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
