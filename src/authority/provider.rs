//! OAuth provider configurations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the client authenticates itself at the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuth {
    /// HTTP Basic `client_id:client_secret`, JSON body (Notion)
    #[default]
    Basic,
    /// `client_id` / `client_secret` as form fields
    RequestBody,
}

/// Endpoint configuration for one provider, as written in the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Requested OAuth scopes
    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub client_auth: ClientAuth,

    /// Extra query parameters for the authorization URL
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl ProviderSettings {
    /// Built-in Notion public-integration endpoints.
    pub fn notion() -> Self {
        Self {
            auth_url: "https://api.notion.com/v1/oauth/authorize".to_string(),
            token_url: "https://api.notion.com/v1/oauth/token".to_string(),
            scopes: vec!["page:write".to_string()],
            client_auth: ClientAuth::Basic,
            extra_params: BTreeMap::from([("owner".to_string(), "user".to_string())]),
        }
    }
}

/// Settings plus the client credentials loaded from the environment.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub settings: ProviderSettings,
    pub client_id: String,
    pub client_secret: String,
}

impl ProviderConfig {
    /// Resolve client credentials from `PAGEGATE_OAUTH_<PROVIDER>_CLIENT_ID` /
    /// `_CLIENT_SECRET`. Returns None when either is unset.
    pub fn from_env(provider: &str, settings: ProviderSettings) -> Option<Self> {
        let env_prefix = env_prefix(provider);
        let client_id = std::env::var(format!("PAGEGATE_OAUTH_{}_CLIENT_ID", env_prefix)).ok()?;
        let client_secret =
            std::env::var(format!("PAGEGATE_OAUTH_{}_CLIENT_SECRET", env_prefix)).ok()?;

        Some(Self {
            settings,
            client_id,
            client_secret,
        })
    }

    /// Build authorization URL with state and redirect_uri
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&state={}",
            self.settings.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        );
        if !self.settings.scopes.is_empty() {
            let scopes = self.settings.scopes.join(" ");
            url.push_str("&scope=");
            url.push_str(&urlencoding::encode(&scopes));
        }
        for (key, value) in &self.settings.extra_params {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }
}

/// `notion` → `NOTION`, `my-provider` → `MY_PROVIDER`
pub fn env_prefix(provider: &str) -> String {
    provider
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
