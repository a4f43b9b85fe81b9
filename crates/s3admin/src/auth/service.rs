//! Authentication service.
//!
//! One explicitly constructed instance owns the signing keys, the pending
//! login states and the OIDC client. Handlers and the middleware reach it
//! through `Arc<AuthService>` in the application state.

use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use reqwest::Url;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;

use super::claims::{ClaimMapping, ClaimsMap, extract_string, identity_from_claims};
use super::clock::Clock;
use super::config::{AuthConfig, AuthMode};
use super::csrf::StateStore;
use super::keys::SigningKeypair;
use super::oidc::{OidcClient, redirect_url};
use super::token::{Identity, TokenCodec};
use super::AuthError;

/// Public view of the enabled login methods.
#[derive(Debug, Clone, Serialize)]
pub struct AuthConfigView {
    pub admin: MethodView,
    pub oidc: OidcMethodView,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodView {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OidcMethodView {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug)]
pub struct AuthService {
    config: AuthConfig,
    codec: TokenCodec,
    states: StateStore,
    oidc: Option<OidcClient>,
    mapping: ClaimMapping,
}

impl AuthService {
    /// Build a service without an OIDC provider.
    ///
    /// Fails for `mode = "oidc"`, which needs [`AuthService::from_config`].
    pub fn new(config: AuthConfig, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        let config = prepare(config, "")?;
        if config.mode == AuthMode::Oidc {
            return Err(AuthError::Configuration(
                "OIDC mode requires provider discovery".to_string(),
            ));
        }
        Self::build(config, clock, None)
    }

    /// Build a service, discovering the OIDC provider when `mode = "oidc"`.
    pub async fn from_config(
        config: AuthConfig,
        root_url: &str,
        clock: Arc<dyn Clock>,
        cancel: &CancellationToken,
    ) -> Result<Self, AuthError> {
        let config = prepare(config, root_url)?;

        let oidc = match config.mode {
            AuthMode::Oidc => {
                let redirect = redirect_url(root_url)?;
                Some(OidcClient::discover(&config.oidc, redirect, cancel).await?)
            }
            AuthMode::None | AuthMode::Basic => None,
        };

        Self::build(config, clock, oidc)
    }

    fn build(
        config: AuthConfig,
        clock: Arc<dyn Clock>,
        oidc: Option<OidcClient>,
    ) -> Result<Self, AuthError> {
        let keys = SigningKeypair::initialize(config.session.signing_key.as_deref())?;
        let codec = TokenCodec::new(
            Some(Arc::new(keys)),
            config.session.issuer.clone(),
            clock.clone(),
        );
        let mapping = ClaimMapping {
            username: config.oidc.username_claim.clone(),
            email: config.oidc.email_claim.clone(),
            name: config.oidc.name_claim.clone(),
            roles: config.oidc.roles_claim.clone(),
        };

        log::info!("Authentication mode: {}", config.mode);

        Ok(Self {
            states: StateStore::new(clock),
            codec,
            oidc,
            mapping,
            config,
        })
    }

    pub fn mode(&self) -> AuthMode {
        self.config.mode
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Compare credentials with the configured admin account in constant time.
    pub fn validate_basic(&self, username: &str, password: &str) -> bool {
        if self.config.mode != AuthMode::Basic {
            return false;
        }
        let admin = &self.config.admin;
        let user_ok = digest(username)
            .as_slice()
            .ct_eq(digest(&admin.username).as_slice());
        let pass_ok = digest(password)
            .as_slice()
            .ct_eq(digest(&admin.password).as_slice());
        bool::from(user_ok & pass_ok)
    }

    /// Identity for valid basic credentials.
    pub fn authenticate_basic(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        if self.validate_basic(username, password) {
            Ok(Identity::with_username(username))
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Validate basic credentials and mint a session token.
    pub fn login_basic(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Identity, String), AuthError> {
        let identity = self.authenticate_basic(username, password)?;
        let token = self.issue_session(&identity)?;
        log::info!("Admin login for {}", identity.username);
        Ok((identity, token))
    }

    /// Create a login state and return the provider URL to redirect to.
    pub fn begin_oidc_login(&self) -> Result<Url, AuthError> {
        let oidc = self.oidc.as_ref().ok_or(AuthError::MethodDisabled)?;
        let state = self.states.create();
        oidc.authorization_url(&state)
    }

    /// Finish the authorization-code flow and mint a session token.
    pub async fn complete_oidc_login(
        &self,
        code: &str,
        state: &str,
        cancel: &CancellationToken,
    ) -> Result<(Identity, String), AuthError> {
        let oidc = self.oidc.as_ref().ok_or(AuthError::MethodDisabled)?;

        if !self.states.validate_and_consume(state) {
            return Err(AuthError::InvalidOrExpiredState);
        }
        if code.is_empty() {
            log::warn!("OIDC callback without authorization code");
            return Err(AuthError::ExchangeFailed);
        }

        let tokens = oidc.exchange(code, cancel).await?;
        let use_userinfo = self.config.oidc.use_userinfo;

        let mut claims = match tokens.id_token.as_deref() {
            Some(raw) => oidc.verify_id_token(raw, cancel).await?,
            None if use_userinfo => ClaimsMap::new(),
            None => {
                log::warn!("OIDC token response carried no ID token");
                return Err(AuthError::VerificationFailed);
            }
        };

        if use_userinfo {
            let info = oidc.fetch_user_info(&tokens, cancel).await?;
            let id_sub = extract_string(&claims, "sub");
            let info_sub = extract_string(&info, "sub");
            if !id_sub.is_empty() && id_sub != info_sub {
                log::warn!("OIDC userinfo subject does not match ID token");
                return Err(AuthError::VerificationFailed);
            }
            claims.extend(info);
        }

        let mut identity = identity_from_claims(&claims, &self.mapping);
        if identity.username.is_empty() {
            identity.username = extract_string(&claims, "sub");
        }
        if identity.username.is_empty() {
            log::warn!(
                "OIDC claims carry neither '{}' nor 'sub'",
                self.mapping.username
            );
            return Err(AuthError::VerificationFailed);
        }

        let token = self.issue_session(&identity)?;
        tracing::info!(
            username = %identity.username,
            roles = identity.roles.len(),
            "OIDC login completed"
        );
        Ok((identity, token))
    }

    pub fn issue_session(&self, identity: &Identity) -> Result<String, AuthError> {
        self.codec.issue(identity, self.config.session.ttl_seconds)
    }

    pub fn validate_session(&self, token: &str) -> Result<Identity, AuthError> {
        self.codec.verify(token)
    }

    /// True when an admin role is configured and `identity` holds it.
    pub fn is_admin(&self, identity: &Identity) -> bool {
        match self.config.oidc.admin_role.as_deref() {
            Some(role) if !role.is_empty() => identity.has_role(role),
            _ => false,
        }
    }

    pub fn session_cookie_name(&self) -> &str {
        &self.config.session.cookie.name
    }

    /// `Set-Cookie` value carrying a session token.
    pub fn session_cookie(&self, token: &str) -> String {
        self.cookie_header(token, self.config.cookie_max_age())
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clear_session_cookie(&self) -> String {
        self.cookie_header("", 0)
    }

    fn cookie_header(&self, value: &str, max_age: u64) -> String {
        let cookie = &self.config.session.cookie;
        let mut header = format!(
            "{}={}; Path={}; Max-Age={}; SameSite={}",
            cookie.name, value, cookie.path, max_age, cookie.same_site
        );
        if cookie.http_only {
            header.push_str("; HttpOnly");
        }
        if cookie.secure {
            header.push_str("; Secure");
        }
        header
    }

    pub fn auth_config_view(&self) -> AuthConfigView {
        let oidc_enabled = self.config.mode == AuthMode::Oidc;
        AuthConfigView {
            admin: MethodView {
                enabled: self.config.mode == AuthMode::Basic,
            },
            oidc: OidcMethodView {
                enabled: oidc_enabled,
                provider: if oidc_enabled {
                    self.config.oidc.provider_name.clone()
                } else {
                    None
                },
            },
        }
    }

    /// Public keys that verify session tokens.
    pub fn jwks(&self) -> JwkSet {
        self.codec
            .keys()
            .map(SigningKeypair::jwks)
            .unwrap_or(JwkSet { keys: Vec::new() })
    }

    pub fn pending_login_states(&self) -> usize {
        self.states.len()
    }

    /// Stop background work.
    pub fn shutdown(&self) {
        self.states.shutdown();
    }
}

/// Fixed-length digest so the comparison does not depend on input length.
fn digest(value: &str) -> Vec<u8> {
    Sha256::digest(value.as_bytes()).to_vec()
}

/// Resolve `env:` secrets and validate for the selected mode.
fn prepare(config: AuthConfig, root_url: &str) -> Result<AuthConfig, AuthError> {
    let config = config
        .resolved()
        .map_err(|e| AuthError::Configuration(e.to_string()))?;
    config
        .validate(root_url)
        .map_err(|e| AuthError::Configuration(e.to_string()))?;
    Ok(config)
}
