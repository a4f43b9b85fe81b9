//! Authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Authentication errors.
///
/// Display strings are what clients see, so they never carry provider
/// responses, key material or token contents.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Startup configuration is unusable.
    #[error("authentication is misconfigured")]
    Configuration(String),

    /// Supplied signing key is neither PKCS#8 nor a raw Ed25519 key.
    #[error("invalid signing key format")]
    InvalidKeyFormat,

    /// No signing key is loaded.
    #[error("session signing is unavailable")]
    SigningUnavailable,

    /// No credentials were presented.
    #[error("authentication required")]
    MissingCredentials,

    /// Basic credentials did not match.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Session token failed parsing, signature or time checks.
    #[error("invalid or expired session")]
    InvalidToken,

    /// CSRF state unknown, reused or expired.
    #[error("invalid or expired login state")]
    InvalidOrExpiredState,

    /// Code-for-token exchange with the provider failed.
    #[error("authorization code exchange failed")]
    ExchangeFailed,

    /// ID token or userinfo could not be verified.
    #[error("identity verification failed")]
    VerificationFailed,

    /// The caller abandoned the operation or it timed out.
    #[error("request cancelled")]
    Cancelled,

    /// Authenticated, but not allowed.
    #[error("insufficient permissions")]
    InsufficientPermissions,

    /// The requested scheme is not enabled.
    #[error("authentication method not enabled")]
    MethodDisabled,

    /// Internal error.
    #[error("internal authentication error")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials
            | AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::ExchangeFailed
            | AuthError::VerificationFailed => StatusCode::UNAUTHORIZED,
            AuthError::InvalidOrExpiredState => StatusCode::BAD_REQUEST,
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AuthError::MethodDisabled => StatusCode::NOT_FOUND,
            AuthError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            AuthError::Configuration(_)
            | AuthError::InvalidKeyFormat
            | AuthError::SigningUnavailable
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "configuration_error",
            AuthError::InvalidKeyFormat => "invalid_key_format",
            AuthError::SigningUnavailable => "signing_unavailable",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidToken => "invalid_token",
            AuthError::InvalidOrExpiredState => "invalid_state",
            AuthError::ExchangeFailed => "exchange_failed",
            AuthError::VerificationFailed => "verification_failed",
            AuthError::Cancelled => "cancelled",
            AuthError::InsufficientPermissions => "insufficient_permissions",
            AuthError::MethodDisabled => "method_disabled",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            AuthError::Configuration(detail) | AuthError::Internal(detail) => {
                log::error!("auth error ({}): {}", self.error_code(), detail);
            }
            _ => log::debug!("auth rejection: {}", self.error_code()),
        }

        let body = Json(AuthErrorResponse {
            success: false,
            error: self.to_string(),
            code: self.error_code().to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display_hides_details() {
        let err = AuthError::Internal("signer exploded: key=abcd".to_string());
        assert_eq!(err.to_string(), "internal authentication error");

        let err = AuthError::Configuration("missing issuer".to_string());
        assert_eq!(err.to_string(), "authentication is misconfigured");
    }

    #[test]
    fn test_auth_error_status_codes() {
        assert_eq!(
            AuthError::InvalidToken.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidOrExpiredState.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::ExchangeFailed.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InsufficientPermissions.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::Cancelled.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_auth_error_body_is_structured() {
        let response = AuthError::InvalidOrExpiredState.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "invalid_state");
        assert_eq!(json["error"], "invalid or expired login state");
    }
}
