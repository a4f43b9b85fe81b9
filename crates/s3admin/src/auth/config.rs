//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Which authentication scheme guards the console.
///
/// Exactly one scheme is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication; every request gets an empty identity.
    #[default]
    None,
    /// Static admin username/password.
    Basic,
    /// External OpenID Connect provider.
    Oidc,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::None => write!(f, "none"),
            AuthMode::Basic => write!(f, "basic"),
            AuthMode::Oidc => write!(f, "oidc"),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AuthMode::None),
            "basic" | "admin" => Ok(AuthMode::Basic),
            "oidc" => Ok(AuthMode::Oidc),
            _ => Err(format!("unknown auth mode: {}", s)),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Active authentication scheme.
    pub mode: AuthMode,

    /// Static admin credentials (used when `mode = "basic"`).
    pub admin: AdminConfig,

    /// OpenID Connect provider settings (used when `mode = "oidc"`).
    pub oidc: OidcConfig,

    /// Session token and cookie settings.
    pub session: SessionConfig,
}

/// Static admin credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,
    /// Plain password or `env:VAR_NAME`.
    pub password: String,
}

/// OpenID Connect provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Issuer URL; discovery is read from `<issuer>/.well-known/openid-configuration`.
    pub issuer_url: String,
    pub client_id: String,
    /// Client secret or `env:VAR_NAME`. Empty for public clients.
    pub client_secret: String,
    /// Requested scopes. `openid` is always added.
    pub scopes: Vec<String>,
    /// Display name shown on the login page.
    pub provider_name: Option<String>,

    /// Claim holding the username.
    pub username_claim: String,
    /// Claim holding the email address.
    pub email_claim: String,
    /// Claim holding the display name.
    pub name_claim: String,
    /// Dot-separated path to the roles array, e.g. `resource_access.console.roles`.
    pub roles_claim: Option<String>,
    /// Role granting admin access.
    pub admin_role: Option<String>,

    /// Read claims from the userinfo endpoint instead of the ID token.
    pub use_userinfo: bool,

    pub skip_issuer_check: bool,
    pub skip_audience_check: bool,
    pub skip_expiry_check: bool,
    /// Accept ID tokens without checking their signature. Never use in production.
    pub insecure_skip_signature_check: bool,

    /// Timeout for each call to the provider.
    pub request_timeout_secs: u64,

    /// Where the browser is sent after a successful login.
    pub post_login_redirect: String,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            provider_name: None,
            username_claim: "preferred_username".to_string(),
            email_claim: "email".to_string(),
            name_claim: "name".to_string(),
            roles_claim: None,
            admin_role: None,
            use_userinfo: false,
            skip_issuer_check: false,
            skip_audience_check: false,
            skip_expiry_check: false,
            insecure_skip_signature_check: false,
            request_timeout_secs: 10,
            post_login_redirect: "/".to_string(),
        }
    }
}

/// Session token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Ed25519 private key (PEM, base64 PKCS#8, or base64 raw seed) or `env:VAR_NAME`.
    /// A fresh key is generated at startup when unset.
    pub signing_key: Option<String>,
    /// Lifetime of issued session tokens.
    pub ttl_seconds: u64,
    /// `iss` claim of issued session tokens.
    pub issuer: String,
    pub cookie: CookieConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            ttl_seconds: 60 * 60 * 24,
            issuer: "s3admin".to_string(),
            cookie: CookieConfig::default(),
        }
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl std::fmt::Display for SameSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// Session cookie attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub name: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    /// `Max-Age` in seconds. Defaults to the session TTL when unset.
    pub max_age_seconds: Option<u64>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "s3admin_session".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            max_age_seconds: None,
        }
    }
}

/// Resolve a configured secret, expanding `env:VAR_NAME` syntax.
pub fn resolve_secret(value: &str) -> Result<String, ConfigValidationError> {
    match value.strip_prefix("env:") {
        Some(var_name) => match std::env::var(var_name) {
            Ok(secret) if !secret.is_empty() => Ok(secret),
            Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
            Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
        },
        None => Ok(value.to_string()),
    }
}

impl AuthConfig {
    /// Return a copy with every `env:VAR_NAME` secret replaced by its value.
    pub fn resolved(&self) -> Result<Self, ConfigValidationError> {
        let mut config = self.clone();
        if !config.admin.password.is_empty() {
            config.admin.password = resolve_secret(&config.admin.password)?;
        }
        if !config.oidc.client_secret.is_empty() {
            config.oidc.client_secret = resolve_secret(&config.oidc.client_secret)?;
        }
        if let Some(ref key) = config.session.signing_key {
            config.session.signing_key = Some(resolve_secret(key)?);
        }
        Ok(config)
    }

    /// Validate the configuration for the selected mode.
    pub fn validate(&self, root_url: &str) -> Result<(), ConfigValidationError> {
        if self.session.ttl_seconds == 0 {
            return Err(ConfigValidationError::InvalidSessionTtl);
        }
        if self.session.cookie.name.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("auth.session.cookie.name"));
        }
        if self.session.cookie.same_site == SameSite::None && !self.session.cookie.secure {
            return Err(ConfigValidationError::InsecureSameSiteNone);
        }

        match self.mode {
            AuthMode::None => {}
            AuthMode::Basic => {
                if self.admin.username.trim().is_empty() {
                    return Err(ConfigValidationError::MissingField("auth.admin.username"));
                }
                if self.admin.password.is_empty() {
                    return Err(ConfigValidationError::MissingField("auth.admin.password"));
                }
            }
            AuthMode::Oidc => {
                if self.oidc.issuer_url.trim().is_empty() {
                    return Err(ConfigValidationError::MissingField("auth.oidc.issuer_url"));
                }
                if self.oidc.client_id.trim().is_empty() {
                    return Err(ConfigValidationError::MissingField("auth.oidc.client_id"));
                }
                if root_url.trim().is_empty() {
                    return Err(ConfigValidationError::MissingField("server.root_url"));
                }
            }
        }

        Ok(())
    }

    /// Effective cookie `Max-Age`.
    pub fn cookie_max_age(&self) -> u64 {
        self.session
            .cookie
            .max_age_seconds
            .unwrap_or(self.session.ttl_seconds)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// A field required by the selected mode is empty.
    MissingField(&'static str),
    /// Session TTL must be positive.
    InvalidSessionTtl,
    /// `SameSite=None` cookies are rejected by browsers unless `Secure` is set.
    InsecureSameSiteNone,
    /// Environment variable not found (for `env:VAR_NAME` syntax).
    EnvVarNotFound(String),
    /// Environment variable is empty (for `env:VAR_NAME` syntax).
    EnvVarEmpty(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => {
                write!(f, "'{}' is required for the configured auth mode.", field)
            }
            Self::InvalidSessionTtl => {
                write!(f, "auth.session.ttl_seconds must be greater than zero.")
            }
            Self::InsecureSameSiteNone => {
                write!(
                    f,
                    "auth.session.cookie.same_site = \"None\" requires auth.session.cookie.secure = true."
                )
            }
            Self::EnvVarNotFound(var) => {
                write!(
                    f,
                    "Environment variable '{}' not found (referenced via env:{} in config).",
                    var, var
                )
            }
            Self::EnvVarEmpty(var) => {
                write!(
                    f,
                    "Environment variable '{}' is empty (referenced via env:{} in config).",
                    var, var
                )
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}
