//! HTTP handlers for the authentication endpoints.

use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
    http::{
        StatusCode,
        header::{LOCATION, SET_COOKIE},
    },
    response::{AppendHeaders, IntoResponse},
};
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::error::ApiResult;
use super::state::AppState;
use crate::auth::{AuthConfigView, AuthError, AuthMode, CurrentUser, Identity, RequireAdmin};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Enabled login methods, for the login page.
pub async fn auth_config(State(state): State<AppState>) -> Json<AuthConfigView> {
    Json(state.auth.auth_config_view())
}

/// Public keys verifying session tokens.
pub async fn jwks(State(state): State<AppState>) -> Json<JwkSet> {
    Json(state.auth.jwks())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: UserInfo,
}

/// Admin login with the static credentials.
///
/// Answers with the token in the body and also sets the session cookie.
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;

    if state.auth.mode() != AuthMode::Basic {
        return Err(AuthError::InvalidCredentials.into());
    }

    let (identity, token) = state
        .auth
        .login_basic(&request.username, &request.password)?;
    let cookie = state.auth.session_cookie(&token);

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(LoginResponse {
            success: true,
            token,
            user: UserInfo {
                username: identity.username,
            },
        }),
    ))
}

/// Start the authorization-code flow.
#[instrument(skip(state))]
pub async fn oidc_login(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let url = state.auth.begin_oidc_login()?;
    Ok((StatusCode::FOUND, AppendHeaders([(LOCATION, url.to_string())])))
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Provider redirect target.
#[instrument(skip(state, params))]
pub async fn oidc_callback(
    State(state): State<AppState>,
    params: Result<Query<CallbackParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;

    let code = match params.error.as_deref() {
        Some(error) => {
            warn!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or_default(),
                "OIDC provider returned an error"
            );
            String::new()
        }
        None => params.code.unwrap_or_default(),
    };
    let login_state = params.state.unwrap_or_default();

    let cancel = state.shutdown.child_token();
    let deadline = callback_deadline(state.auth.config().oidc.request_timeout_secs);
    let result = tokio::time::timeout(
        deadline,
        state
            .auth
            .complete_oidc_login(&code, &login_state, &cancel),
    )
    .await;
    cancel.cancel();

    let (identity, token) = match result {
        Ok(outcome) => outcome?,
        Err(_) => {
            warn!("OIDC login timed out after {:?}", deadline);
            return Err(AuthError::Cancelled.into());
        }
    };

    info!(username = %identity.username, "Session established");

    let cookie = state.auth.session_cookie(&token);
    let redirect = state.auth.config().oidc.post_login_redirect.clone();

    Ok((
        StatusCode::FOUND,
        AppendHeaders([(SET_COOKIE, cookie), (LOCATION, redirect)]),
    ))
}

/// Budget for the whole callback: three provider round trips.
fn callback_deadline(request_timeout_secs: u64) -> Duration {
    Duration::from_secs(request_timeout_secs.max(1).saturating_mul(3))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

/// Clear the session cookie.
pub async fn oidc_logout(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    if state.auth.mode() != AuthMode::Oidc {
        return Err(AuthError::MethodDisabled.into());
    }

    Ok((
        AppendHeaders([(SET_COOKIE, state.auth.clear_session_cookie())]),
        Json(LogoutResponse {
            success: true,
            message: "Logged out".to_string(),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: Identity,
    pub is_admin: bool,
}

/// Identity attached to the current request.
pub async fn me(user: CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        success: true,
        is_admin: user.is_admin(),
        user: user.identity,
    })
}

/// Admin-only probe.
pub async fn admin(RequireAdmin(user): RequireAdmin) -> Json<MeResponse> {
    Json(MeResponse {
        success: true,
        is_admin: true,
        user: user.identity,
    })
}
