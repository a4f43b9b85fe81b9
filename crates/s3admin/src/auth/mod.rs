//! Authentication module.
//!
//! Provides session-token authentication with support for:
//! - static admin credentials (`mode = "basic"`)
//! - an external OpenID Connect provider (`mode = "oidc"`)
//! - no authentication at all (`mode = "none"`)

mod claims;
mod clock;
mod config;
mod csrf;
mod error;
mod keys;
mod middleware;
mod oidc;
mod service;
mod token;

pub use claims::{
    ClaimMapping, ClaimsMap, extract_roles, extract_string, identity_from_claims, lookup_path,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AdminConfig, AuthConfig, AuthMode, ConfigValidationError, CookieConfig, OidcConfig, SameSite,
    SessionConfig, resolve_secret,
};
pub use csrf::{STATE_TTL_MINUTES, StateStore};
pub use error::{AuthError, AuthErrorResponse};
pub use keys::SigningKeypair;
pub use middleware::{CurrentUser, RequireAdmin, auth_middleware};
pub use oidc::{
    CALLBACK_PATH, OidcClient, ProviderMetadata, TokenBundle, cancellable, redirect_url,
};
pub use service::{AuthConfigView, AuthService};
pub use token::{Identity, SessionClaims, TokenCodec};
