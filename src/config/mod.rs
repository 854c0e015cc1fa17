pub mod env;

use crate::authority::ProviderSettings;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Complete pagegate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gate: PolicyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Externally reachable base URL; OAuth callbacks are built from it
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:2022".to_string()
}

fn default_public_url() -> String {
    "http://localhost:2022".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_url: default_public_url(),
        }
    }
}

/// Gating policy
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Provider every gated operation authorizes against
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Try the refresh token before challenging an agent whose token expired
    #[serde(default = "default_refresh_expired")]
    pub refresh_expired: bool,
    /// Tokens expiring within this window count as expired
    #[serde(default = "default_expiry_leeway")]
    pub expiry_leeway_seconds: i64,
}

fn default_provider() -> String {
    "notion".to_string()
}

fn default_refresh_expired() -> bool {
    true
}

fn default_expiry_leeway() -> i64 {
    30
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            refresh_expired: default_refresh_expired(),
            expiry_leeway_seconds: default_expiry_leeway(),
        }
    }
}

/// Credential persistence. Off by default: credentials live for the process lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub persist: bool,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "credentials.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist: false,
            database_path: default_database_path(),
        }
    }
}

/// OAuth authority configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long a CSRF state (and so a challenge URL) stays valid
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Timeout for token endpoint requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderSettings>,
}

fn default_state_expiry() -> i64 {
    600
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_providers() -> BTreeMap<String, ProviderSettings> {
    BTreeMap::from([("notion".to_string(), ProviderSettings::notion())])
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_expiry_seconds: default_state_expiry(),
            cleanup_interval_seconds: default_cleanup_interval(),
            request_timeout_seconds: default_request_timeout(),
            providers: default_providers(),
        }
    }
}

/// Caller authentication for the tool API.
///
/// The agent host presents `api_key` as a bearer token; only then is its
/// `X-Agent-Id` header trusted. The OAuth callback and `/health` stay open.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_enabled")]
    pub enabled: bool,
    /// Usually supplied via `PAGEGATE_API_KEY` rather than the file
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_auth_enabled() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_auth_enabled(),
            api_key: None,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gate: PolicyConfig::default(),
            storage: StorageConfig::default(),
            oauth: OAuthConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Longest accepted CSRF state lifetime, cleanup interval and expiry leeway.
pub const MAX_DURATION_SECONDS: i64 = 7 * 24 * 60 * 60;

impl GateConfig {
    /// Reject durations the runtime cannot use (a zero cleanup interval, or
    /// values large enough to overflow timestamp arithmetic).
    pub fn validate(&self) -> Result<()> {
        let interval = self.oauth.cleanup_interval_seconds;
        if interval == 0 || interval > MAX_DURATION_SECONDS as u64 {
            bail!(
                "oauth.cleanup_interval_seconds must be between 1 and {}, got {}",
                MAX_DURATION_SECONDS,
                interval
            );
        }

        let state_expiry = self.oauth.state_expiry_seconds;
        if !(1..=MAX_DURATION_SECONDS).contains(&state_expiry) {
            bail!(
                "oauth.state_expiry_seconds must be between 1 and {}, got {}",
                MAX_DURATION_SECONDS,
                state_expiry
            );
        }

        let leeway = self.gate.expiry_leeway_seconds;
        if !(0..=MAX_DURATION_SECONDS).contains(&leeway) {
            bail!(
                "gate.expiry_leeway_seconds must be between 0 and {}, got {}",
                MAX_DURATION_SECONDS,
                leeway
            );
        }

        if self.oauth.request_timeout_seconds == 0 {
            bail!("oauth.request_timeout_seconds must be at least 1");
        }

        Ok(())
    }
}

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GateConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: GateConfig = toml::from_str(&contents)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}
