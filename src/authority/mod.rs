//! External authorization authority.
//!
//! The gate only needs two things from an authority: a challenge URL for an
//! agent without a usable credential, and (optionally) a refreshed credential
//! for an agent whose token expired. [`OAuth2Authority`] implements both with
//! the authorization-code flow:
//!
//! 1. Gate asks for a challenge → URL with a single-use CSRF state bound to the agent
//! 2. Operator visits the URL and authorizes on the provider's site
//! 3. Provider redirects to `/oauth/:provider/callback?code&state`
//! 4. [`OAuth2Authority::complete`] validates the state and exchanges the code
//! 5. The resulting [`Grant`] is handed to the gate's `on_grant`

mod exchange;
mod provider;
mod state_manager;

pub use provider::{env_prefix, ClientAuth, ProviderConfig, ProviderSettings};
pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use crate::config::OAuthConfig;
use crate::credentials::{AgentId, CredentialSet};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capability the gate consumes from the authorization authority.
#[async_trait]
pub trait AuthorizationAuthority: Send + Sync {
    /// Produce a URL the agent's operator must visit to grant access.
    ///
    /// Stateless from the gate's point of view: calling it twice for the same
    /// agent yields two equally valid URLs.
    async fn challenge_url(&self, provider: &str, agent: &AgentId)
        -> Result<String, AuthorityError>;

    /// Exchange a refresh token for a new credential set.
    async fn refresh(
        &self,
        provider: &str,
        _credentials: &CredentialSet,
    ) -> Result<CredentialSet, AuthorityError> {
        Err(AuthorityError::RefreshUnsupported(provider.to_string()))
    }
}

/// Authority failures
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityError {
    /// No settings exist for this provider
    UnknownProvider(String),
    /// Provider known but its client credentials are missing
    NotConfigured(String),
    /// CSRF state missing, expired, consumed, or issued for another provider
    InvalidState,
    /// Token endpoint call failed
    Exchange(String),
    /// Provider or credential cannot be refreshed
    RefreshUnsupported(String),
}

impl fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityError::UnknownProvider(p) => write!(f, "Unknown OAuth provider '{}'", p),
            AuthorityError::NotConfigured(p) => write!(
                f,
                "OAuth not configured for provider '{}'. Set PAGEGATE_OAUTH_{}_CLIENT_ID and PAGEGATE_OAUTH_{}_CLIENT_SECRET environment variables.",
                p,
                env_prefix(p),
                env_prefix(p)
            ),
            AuthorityError::InvalidState => {
                write!(f, "Invalid or expired OAuth state (possible CSRF attack)")
            }
            AuthorityError::Exchange(msg) => write!(f, "Token exchange failed: {}", msg),
            AuthorityError::RefreshUnsupported(p) => {
                write!(f, "Credential refresh not supported for provider '{}'", p)
            }
        }
    }
}

impl std::error::Error for AuthorityError {}

/// A credential granted for an agent, ready for `on_grant`.
#[derive(Debug, Clone)]
pub struct Grant {
    pub agent: AgentId,
    pub credentials: CredentialSet,
}

/// OAuth 2.0 authorization-code authority.
pub struct OAuth2Authority {
    /// Provider name → resolved config; None when client credentials are missing
    providers: BTreeMap<String, Option<ProviderConfig>>,
    states: StateManager,
    http: reqwest::Client,
    callback_base_url: String,
}

impl OAuth2Authority {
    /// Build from config, loading client credentials from the environment.
    ///
    /// Providers without credentials stay registered; challenges for them fail
    /// with [`AuthorityError::NotConfigured`].
    pub fn from_config(config: &OAuthConfig, callback_base_url: &str) -> Result<Self> {
        let mut authority = Self::new(config, callback_base_url)?;
        for (name, settings) in &config.providers {
            let resolved = ProviderConfig::from_env(name, settings.clone());
            if resolved.is_none() {
                warn!(provider = %name, "OAuth client credentials not set");
            }
            authority.providers.insert(name.clone(), resolved);
        }
        Ok(authority)
    }

    /// Authority with no providers; add them with [`Self::with_provider`].
    pub fn new(config: &OAuthConfig, callback_base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build OAuth HTTP client")?;

        Ok(Self {
            providers: BTreeMap::new(),
            states: StateManager::new(config.state_expiry_seconds),
            http,
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Register a fully configured provider.
    pub fn with_provider(mut self, name: &str, provider: ProviderConfig) -> Self {
        self.providers.insert(name.to_string(), Some(provider));
        self
    }

    /// Callback URL registered with the provider
    pub fn redirect_uri(&self, provider: &str) -> String {
        format!("{}/oauth/{}/callback", self.callback_base_url, provider)
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.states
    }

    fn provider(&self, name: &str) -> Result<&ProviderConfig, AuthorityError> {
        match self.providers.get(name) {
            None => Err(AuthorityError::UnknownProvider(name.to_string())),
            Some(None) => Err(AuthorityError::NotConfigured(name.to_string())),
            Some(Some(config)) => Ok(config),
        }
    }

    /// Handle the provider's redirect: validate the CSRF state, exchange the
    /// code, and return the grant for the agent the state was issued to.
    pub async fn complete(
        &self,
        provider: &str,
        code: &str,
        state: &str,
    ) -> Result<Grant, AuthorityError> {
        let entry = self.states.redeem(state).ok_or_else(|| {
            warn!(provider = %provider, "Invalid or expired OAuth state");
            AuthorityError::InvalidState
        })?;

        if entry.provider != provider {
            warn!(
                expected = %entry.provider,
                actual = %provider,
                "OAuth callback provider mismatch"
            );
            return Err(AuthorityError::InvalidState);
        }

        let config = self.provider(provider)?;
        debug!(provider = %provider, agent = %entry.agent, "Exchanging authorization code");

        let credentials = exchange::exchange_code_for_token(
            &self.http,
            config,
            code,
            &self.redirect_uri(provider),
        )
        .await
        .map_err(|e| AuthorityError::Exchange(format!("{:#}", e)))?;

        info!(
            provider = %provider,
            agent = %entry.agent,
            has_refresh_token = credentials.refresh_token.is_some(),
            "Completed OAuth flow"
        );

        Ok(Grant {
            agent: entry.agent,
            credentials,
        })
    }
}

#[async_trait]
impl AuthorizationAuthority for OAuth2Authority {
    async fn challenge_url(
        &self,
        provider: &str,
        agent: &AgentId,
    ) -> Result<String, AuthorityError> {
        let config = self.provider(provider)?;
        let state = self.states.issue(provider, agent);
        Ok(config.build_auth_url(&state, &self.redirect_uri(provider)))
    }

    async fn refresh(
        &self,
        provider: &str,
        credentials: &CredentialSet,
    ) -> Result<CredentialSet, AuthorityError> {
        let config = self.provider(provider)?;
        if credentials.refresh_token.is_none() {
            return Err(AuthorityError::RefreshUnsupported(provider.to_string()));
        }

        exchange::refresh_access_token(&self.http, config, credentials)
            .await
            .map_err(|e| AuthorityError::Exchange(format!("{:#}", e)))
    }
}
