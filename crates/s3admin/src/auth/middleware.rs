//! Authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;

use super::{AuthError, AuthMode, AuthService, Identity};

/// Split an Authorization header into scheme and the single credential after it.
fn credential_from_header<'a>(header_value: &'a str, scheme: &str) -> Option<&'a str> {
    let mut parts = header_value.split_whitespace();
    let found = parts.next()?;
    if !found.eq_ignore_ascii_case(scheme) {
        return None;
    }

    let credential = parts.next()?;
    if credential.is_empty() || parts.next().is_some() {
        return None;
    }

    Some(credential)
}

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Option<&str> {
    credential_from_header(header_value, "bearer")
}

/// Decode `Basic base64(user:password)`.
fn basic_credentials_from_header(header_value: &str) -> Option<(String, String)> {
    let encoded = credential_from_header(header_value, "basic")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim()).filter(|v| !v.is_empty())
        } else {
            None
        }
    })
}

fn session_cookie<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find_map(|cookie_header| token_from_cookie_header(cookie_header, cookie_name))
}

/// Try each applicable scheme in priority order.
///
/// A failing scheme does not stop later ones; when all fail the last
/// failure is returned.
fn authenticate(auth: &AuthService, headers: &HeaderMap) -> Result<Identity, AuthError> {
    let auth_header = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());
    let mut last_error = None;

    if auth.mode() == AuthMode::Basic {
        if let Some((username, password)) = auth_header.and_then(basic_credentials_from_header) {
            match auth.authenticate_basic(&username, &password) {
                Ok(identity) => return Ok(identity),
                Err(e) => {
                    debug!("basic credentials rejected");
                    last_error = Some(e);
                }
            }
        }
    }

    if let Some(token) = auth_header.and_then(bearer_token_from_header) {
        match auth.validate_session(token) {
            Ok(identity) => return Ok(identity),
            Err(e) => {
                debug!("bearer session rejected");
                last_error = Some(e);
            }
        }
    }

    if let Some(token) = session_cookie(headers, auth.session_cookie_name()) {
        match auth.validate_session(token) {
            Ok(identity) => return Ok(identity),
            Err(e) => {
                debug!("session cookie rejected");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(AuthError::MissingCredentials))
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub identity: Identity,
    is_admin: bool,
}

impl CurrentUser {
    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

/// Authentication middleware.
///
/// Injects [`CurrentUser`] into request extensions. Schemes, in order:
/// 1. `Authorization: Basic` (basic mode only)
/// 2. `Authorization: Bearer <session token>`
/// 3. session cookie
///
/// With `mode = "none"` every request gets an empty identity with admin
/// rights, so no protected route is closed.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthService>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let user = match auth.mode() {
        AuthMode::None => CurrentUser {
            identity: Identity::anonymous(),
            is_admin: true,
        },
        AuthMode::Basic | AuthMode::Oidc => {
            let identity = authenticate(&auth, req.headers())?;
            CurrentUser {
                is_admin: auth.is_admin(&identity),
                identity,
            }
        }
    };
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Require admin role.
///
/// Use as an extractor in handlers that require admin access.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentUser);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)?;

        if !user.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(RequireAdmin(user))
    }
}
