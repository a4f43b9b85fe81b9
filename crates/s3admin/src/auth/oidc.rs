//! OpenID Connect client.
//!
//! Discovery happens once at startup. Every call to the provider races a
//! [`CancellationToken`] and yields [`AuthError::Cancelled`] when it fires.

use std::future::Future;
use std::time::Duration;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::AuthError;
use super::claims::ClaimsMap;
use super::config::OidcConfig;

/// Path of the callback route, appended to the public root URL.
pub const CALLBACK_PATH: &str = "/auth/oidc/callback";

/// Subset of the provider discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Carried for completeness; sessions are never renewed with it.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Which ID token checks are enforced.
#[derive(Debug, Clone, Copy)]
struct Checks {
    issuer: bool,
    audience: bool,
    expiry: bool,
    signature: bool,
}

/// Authorization-code client bound to one provider.
#[derive(Debug)]
pub struct OidcClient {
    http: reqwest::Client,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: Option<String>,
    redirect_url: Url,
    scopes: Vec<String>,
    checks: Checks,
    jwks: RwLock<JwkSet>,
}

/// Build the callback URL from the externally visible root URL.
pub fn redirect_url(root_url: &str) -> Result<Url, AuthError> {
    let url = format!("{}{}", root_url.trim_end_matches('/'), CALLBACK_PATH);
    Url::parse(&url).map_err(|e| AuthError::Configuration(format!("invalid root URL: {e}")))
}

fn discovery_url(issuer_url: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer_url.trim_end_matches('/')
    )
}

/// Scopes with `openid` first and duplicates removed.
fn normalize_scopes(configured: &[String]) -> Vec<String> {
    let mut scopes = vec!["openid".to_string()];
    for scope in configured.iter().map(|s| s.trim()) {
        if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

fn is_supported_alg(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
            | Algorithm::EdDSA
    )
}

fn select_jwk<'a>(keys: &'a [Jwk], kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => keys
            .iter()
            .find(|key| key.common.key_id.as_deref() == Some(kid)),
        None if keys.len() == 1 => keys.first(),
        None => None,
    }
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        result = fut => result,
    }
}

impl OidcClient {
    /// Fetch the discovery document and signing keys of the configured provider.
    pub async fn discover(
        config: &OidcConfig,
        redirect_url: Url,
        cancel: &CancellationToken,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| AuthError::Configuration(format!("building HTTP client: {e}")))?;

        let url = discovery_url(&config.issuer_url);
        log::info!("Discovering OIDC provider at {}", url);

        let metadata: ProviderMetadata = cancellable(cancel, async {
            let response = http
                .get(&url)
                .send()
                .await
                .map_err(|e| AuthError::Configuration(format!("OIDC discovery failed: {e}")))?;
            if !response.status().is_success() {
                return Err(AuthError::Configuration(format!(
                    "OIDC discovery returned {}",
                    response.status()
                )));
            }
            response.json::<ProviderMetadata>().await.map_err(|e| {
                AuthError::Configuration(format!("OIDC discovery document invalid: {e}"))
            })
        })
        .await?;

        if !config.skip_issuer_check
            && metadata.issuer.trim_end_matches('/') != config.issuer_url.trim_end_matches('/')
        {
            return Err(AuthError::Configuration(format!(
                "OIDC issuer mismatch: configured {}, provider reports {}",
                config.issuer_url, metadata.issuer
            )));
        }

        let jwks = cancellable(cancel, fetch_jwks(&http, &metadata.jwks_uri))
            .await
            .map_err(|e| match e {
                AuthError::Cancelled => AuthError::Cancelled,
                _ => AuthError::Configuration("OIDC signing keys unavailable".to_string()),
            })?;

        if config.insecure_skip_signature_check {
            log::warn!("OIDC ID token signature verification is DISABLED");
        }

        log::info!(
            "OIDC provider {} ready ({} signing keys)",
            metadata.issuer,
            jwks.keys.len()
        );

        let client_secret = Some(config.client_secret.clone()).filter(|s| !s.is_empty());

        Ok(Self {
            http,
            metadata,
            client_id: config.client_id.clone(),
            client_secret,
            redirect_url,
            scopes: normalize_scopes(&config.scopes),
            checks: Checks {
                issuer: !config.skip_issuer_check,
                audience: !config.skip_audience_check,
                expiry: !config.skip_expiry_check,
                signature: !config.insecure_skip_signature_check,
            },
            jwks: RwLock::new(jwks),
        })
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    /// Provider authorization URL carrying `state`.
    pub fn authorization_url(&self, state: &str) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.metadata.authorization_endpoint).map_err(|e| {
            AuthError::Internal(format!("invalid authorization endpoint: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenBundle, AuthError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        cancellable(cancel, async {
            let response = self
                .http
                .post(&self.metadata.token_endpoint)
                .form(&form)
                .send()
                .await
                .map_err(|e| {
                    log::warn!("OIDC token request failed: {}", e);
                    AuthError::ExchangeFailed
                })?;

            if !response.status().is_success() {
                log::warn!("OIDC token endpoint returned {}", response.status());
                return Err(AuthError::ExchangeFailed);
            }

            response.json::<TokenBundle>().await.map_err(|e| {
                log::warn!("OIDC token response invalid: {}", e);
                AuthError::ExchangeFailed
            })
        })
        .await
    }

    /// Verify an ID token and return its claims.
    pub async fn verify_id_token(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<ClaimsMap, AuthError> {
        let header = decode_header(raw).map_err(|e| {
            log::warn!("ID token header invalid: {}", e);
            AuthError::VerificationFailed
        })?;
        if !is_supported_alg(header.alg) {
            log::warn!("ID token uses unsupported algorithm {:?}", header.alg);
            return Err(AuthError::VerificationFailed);
        }

        let mut validation = self.validation(header.alg);
        let key = if self.checks.signature {
            self.decoding_key(&header, cancel).await?
        } else {
            validation.insecure_disable_signature_validation();
            DecodingKey::from_secret(&[])
        };

        decode::<ClaimsMap>(raw, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                log::warn!("ID token rejected: {:?}", e.kind());
                AuthError::VerificationFailed
            })
    }

    /// Claims from the userinfo endpoint.
    pub async fn fetch_user_info(
        &self,
        tokens: &TokenBundle,
        cancel: &CancellationToken,
    ) -> Result<ClaimsMap, AuthError> {
        let endpoint = self.metadata.userinfo_endpoint.as_deref().ok_or_else(|| {
            log::warn!("OIDC provider has no userinfo endpoint");
            AuthError::VerificationFailed
        })?;

        cancellable(cancel, async {
            let response = self
                .http
                .get(endpoint)
                .bearer_auth(&tokens.access_token)
                .send()
                .await
                .map_err(|e| {
                    log::warn!("OIDC userinfo request failed: {}", e);
                    AuthError::VerificationFailed
                })?;

            if !response.status().is_success() {
                log::warn!("OIDC userinfo endpoint returned {}", response.status());
                return Err(AuthError::VerificationFailed);
            }

            response.json::<ClaimsMap>().await.map_err(|e| {
                log::warn!("OIDC userinfo response invalid: {}", e);
                AuthError::VerificationFailed
            })
        })
        .await
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.validate_nbf = true;
        validation.validate_exp = self.checks.expiry;

        let mut required = vec!["sub"];
        if self.checks.expiry {
            required.push("exp");
        }
        if self.checks.issuer {
            required.push("iss");
            validation.set_issuer(&[self.metadata.issuer.as_str()]);
        }
        if self.checks.audience {
            required.push("aud");
            validation.set_audience(&[self.client_id.as_str()]);
        } else {
            validation.validate_aud = false;
        }
        validation.set_required_spec_claims(&required);

        validation
    }

    /// Key for `header.kid`, refetching the JWKS once when the kid is unknown.
    async fn decoding_key(
        &self,
        header: &Header,
        cancel: &CancellationToken,
    ) -> Result<DecodingKey, AuthError> {
        let kid = header.kid.as_deref();

        if let Some(jwk) = select_jwk(&self.jwks.read().await.keys, kid) {
            return key_from_jwk(jwk);
        }

        log::debug!("ID token key {:?} not cached, refreshing JWKS", kid);
        let fresh = cancellable(cancel, fetch_jwks(&self.http, &self.metadata.jwks_uri)).await?;
        let mut jwks = self.jwks.write().await;
        *jwks = fresh;

        match select_jwk(&jwks.keys, kid) {
            Some(jwk) => key_from_jwk(jwk),
            None => {
                log::warn!("No provider key matches ID token kid {:?}", kid);
                Err(AuthError::VerificationFailed)
            }
        }
    }
}

fn key_from_jwk(jwk: &Jwk) -> Result<DecodingKey, AuthError> {
    DecodingKey::from_jwk(jwk).map_err(|e| {
        log::warn!("Provider key unusable: {}", e);
        AuthError::VerificationFailed
    })
}

async fn fetch_jwks(http: &reqwest::Client, jwks_uri: &str) -> Result<JwkSet, AuthError> {
    let response = http.get(jwks_uri).send().await.map_err(|e| {
        log::warn!("JWKS request failed: {}", e);
        AuthError::VerificationFailed
    })?;
    if !response.status().is_success() {
        log::warn!("JWKS endpoint returned {}", response.status());
        return Err(AuthError::VerificationFailed);
    }
    response.json::<JwkSet>().await.map_err(|e| {
        log::warn!("JWKS payload invalid: {}", e);
        AuthError::VerificationFailed
    })
}
