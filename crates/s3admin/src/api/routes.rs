//! Route definitions.

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use crate::auth::{CALLBACK_PATH, auth_middleware};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    // Protected routes (require authentication)
    let protected_routes = Router::new()
        .route("/auth/me", get(handlers::me))
        .route("/auth/admin", get(handlers::admin))
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Public routes (no authentication)
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/config", get(handlers::auth_config))
        .route("/auth/jwks", get(handlers::jwks))
        .route("/auth/login", post(handlers::login))
        .route("/auth/oidc/login", get(handlers::oidc_login))
        .route(CALLBACK_PATH, get(handlers::oidc_callback))
        .route("/auth/oidc/logout", post(handlers::oidc_logout))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer from the configured origins.
///
/// With no configured origins cross-origin requests are not allowed.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
        ])
        .allow_credentials(true)
}
