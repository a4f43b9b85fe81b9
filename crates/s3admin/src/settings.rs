//! Application configuration.
//!
//! Layered: built-in defaults, then the TOML file, then `S3ADMIN__*`
//! environment variables (`__` separates nesting levels).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;

pub const APP_NAME: &str = "s3admin";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when neither `RUST_LOG` nor CLI flags say otherwise.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally visible base URL; the OIDC redirect URL is derived from it.
    pub root_url: String,
    /// Origins allowed to make credentialed cross-origin requests.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            root_url: String::new(),
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Root URL, falling back to the bind address.
    pub fn effective_root_url(&self) -> String {
        if self.root_url.trim().is_empty() {
            format!("http://{}:{}", self.host, self.port)
        } else {
            self.root_url.trim_end_matches('/').to_string()
        }
    }
}

/// Load the configuration from `path` (optional) and the environment.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let env_prefix = env_prefix();
    let built = Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()
        .with_context(|| format!("reading configuration from {}", path.display()))?;

    built
        .try_deserialize()
        .context("parsing configuration")
}

/// Write a commented default configuration file.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Secrets accept env:VAR_NAME, e.g. password = \"env:S3ADMIN_ADMIN_PASSWORD\"\n");
    buffer.push('\n');
    buffer
}

/// Config file path from an optional override.
///
/// A directory override resolves to `config.toml` inside it.
pub fn resolve_config_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => {
            let expanded = shellexpand::full(text).context("expanding path")?;
            Ok(PathBuf::from(expanded.to_string()))
        }
        None => Ok(path),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
