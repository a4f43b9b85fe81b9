//! Session token codec.
//!
//! Session tokens are EdDSA-signed JWTs carrying the [`Identity`] plus
//! `iat`/`nbf`/`exp`. They are stateless: nothing is stored server side.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::AuthError;
use super::clock::Clock;
use super::keys::SigningKeypair;

/// Authenticated subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    /// Identity carrying only a username.
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Anonymous identity used when authentication is disabled.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// JWT claims of a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Identity {
            username: claims.username,
            email: claims.email,
            name: claims.name,
            roles: claims.roles,
        }
    }
}

/// Signs and verifies session tokens with the process keypair.
#[derive(Clone)]
pub struct TokenCodec {
    keys: Option<Arc<SigningKeypair>>,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(
        keys: Option<Arc<SigningKeypair>>,
        issuer: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            clock,
        }
    }

    pub fn keys(&self) -> Option<&SigningKeypair> {
        self.keys.as_deref()
    }

    /// Sign a token for `identity` valid for `ttl_seconds` from now.
    pub fn issue(&self, identity: &Identity, ttl_seconds: u64) -> Result<String, AuthError> {
        let keys = self.keys.as_ref().ok_or(AuthError::SigningUnavailable)?;
        if ttl_seconds == 0 {
            return Err(AuthError::Internal("session ttl must be positive".to_string()));
        }
        let ttl = i64::try_from(ttl_seconds)
            .map_err(|_| AuthError::Internal("session ttl out of range".to_string()))?;

        let now = self.clock.now().timestamp();
        let claims = SessionClaims {
            sub: identity.username.clone(),
            username: identity.username.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            roles: identity.roles.clone(),
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(keys.key_id().to_string());

        encode(&header, &claims, keys.encoding_key())
            .map_err(|e| AuthError::Internal(format!("signing session token: {e}")))
    }

    /// Verify a token and return the identity it carries.
    ///
    /// Every failure is reported as [`AuthError::InvalidToken`].
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let keys = self.keys.as_ref().ok_or(AuthError::InvalidToken)?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.algorithms = vec![Algorithm::EdDSA];
        validation.leeway = 0;
        validation.validate_aud = false;
        // Time window is checked below against the injected clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "nbf", "iss"]);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<SessionClaims>(token, keys.decoding_key(), &validation).map_err(|e| {
            log::debug!("session token rejected: {:?}", e.kind());
            AuthError::InvalidToken
        })?;

        let now = self.clock.now().timestamp();
        let claims = data.claims;
        if now < claims.nbf || now > claims.exp {
            log::debug!("session token outside its validity window");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims.into())
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("keys", &self.keys)
            .field("issuer", &self.issuer)
            .finish()
    }
}
