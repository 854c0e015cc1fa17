//! Authorization gate.
//!
//! Every protected operation goes through [`AuthorizationGate::invoke`], which
//! applies one branch for all of them:
//!
//! ```text
//! invoke(agent, op, params)
//!     │
//!     ├─ store: Fresh(c)     → op.perform(c, params) → Success | Failure(Upstream)
//!     │
//!     ├─ store: Expired(c)   → refresh (if enabled and c has a refresh token)
//!     │                          ├─ ok  → store c' if c is still current → op.perform
//!     │                          └─ err → challenge
//!     │
//!     └─ store: Missing      → challenge
//!                                ├─ ok  → NeedsAuthorization(url)   (op never runs)
//!                                └─ err → Failure(AuthorityUnavailable)
//! ```
//!
//! Operations carry no authentication logic of their own. Grants arrive
//! through [`AuthorizationGate::on_grant`]; a refresh only replaces the exact
//! credential it started from, so it never overwrites a newer grant. At most
//! one refresh per agent is in flight. Nothing is retried inside the gate.

use crate::authority::AuthorizationAuthority;
use crate::credentials::{AgentId, CredentialSet, CredentialStore, Lookup};
use crate::operation::{Challenge, Failure, Invocation, Operation};
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Gate behaviour knobs
#[derive(Debug, Clone)]
pub struct GatePolicy {
    /// Try the authority's refresh before challenging an expired credential
    pub refresh_expired: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            refresh_expired: true,
        }
    }
}

/// Enforces "proceed with a valid credential, or short-circuit into a challenge".
pub struct AuthorizationGate {
    store: Arc<CredentialStore>,
    authority: Arc<dyn AuthorizationAuthority>,
    provider: String,
    policy: GatePolicy,
    refreshing: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl AuthorizationGate {
    pub fn new(
        store: Arc<CredentialStore>,
        authority: Arc<dyn AuthorizationAuthority>,
        provider: impl Into<String>,
        policy: GatePolicy,
    ) -> Self {
        Self {
            store,
            authority,
            provider: provider.into(),
            policy,
            refreshing: DashMap::new(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Run `operation` for `agent`, or return a challenge if the agent has no
    /// usable credential.
    pub async fn invoke(
        &self,
        agent: &AgentId,
        operation: &dyn Operation,
        params: Value,
    ) -> Invocation {
        let credentials = match self.store.lookup(agent) {
            Lookup::Fresh(credentials) => credentials,
            Lookup::Expired(_) => match self.try_refresh(agent).await {
                Some(refreshed) => refreshed,
                None => return self.challenge(agent).await,
            },
            Lookup::Missing => return self.challenge(agent).await,
        };

        debug!(agent = %agent, operation = operation.name(), "Invoking gated operation");

        match operation.perform(&credentials, params).await {
            Ok(data) => Invocation::Success { data },
            Err(failure) => {
                warn!(
                    agent = %agent,
                    operation = operation.name(),
                    kind = failure.kind.as_str(),
                    error = %failure.message,
                    "Upstream operation failed"
                );
                Invocation::Failure {
                    error: Failure::Upstream(failure),
                }
            }
        }
    }

    /// Explicit (re-)authorization: a challenge for `agent` whether or not it
    /// already holds a credential. The stored credential is left alone until
    /// the new grant arrives.
    pub async fn authorize(&self, agent: &AgentId) -> Invocation {
        self.challenge(agent).await
    }

    /// Grant callback: store a freshly granted credential for `agent`.
    ///
    /// Replaces any existing credential wholesale. When two grants for the same
    /// agent race, whichever is applied last is kept.
    pub async fn on_grant(&self, agent: &AgentId, credentials: CredentialSet) -> Result<()> {
        let owned = agent.clone();
        self.write(move |store| store.set(&owned, credentials)).await?;
        info!(agent = %agent, provider = %self.provider, "Stored granted credentials");
        Ok(())
    }

    /// Drop the agent's credential; its next invocation is challenged.
    pub async fn revoke(&self, agent: &AgentId) -> Result<()> {
        let owned = agent.clone();
        self.write(move |store| store.clear(&owned)).await?;
        info!(agent = %agent, "Revoked credentials");
        Ok(())
    }

    /// Whether the agent currently holds a usable credential.
    pub fn is_authorized(&self, agent: &AgentId) -> bool {
        self.store.get(agent).is_some()
    }

    async fn challenge(&self, agent: &AgentId) -> Invocation {
        match self.authority.challenge_url(&self.provider, agent).await {
            Ok(authorization_url) => {
                info!(agent = %agent, provider = %self.provider, "Authorization required");
                Invocation::NeedsAuthorization {
                    challenge: Challenge {
                        agent_id: agent.to_string(),
                        provider: self.provider.clone(),
                        authorization_url,
                    },
                }
            }
            Err(e) => {
                warn!(agent = %agent, error = %e, "Failed to generate authorization URL");
                Invocation::Failure {
                    error: Failure::AuthorityUnavailable {
                        message: e.to_string(),
                    },
                }
            }
        }
    }

    /// Single-flight refresh of the agent's expired credential.
    ///
    /// Returns the credential to use, or None to challenge.
    async fn try_refresh(&self, agent: &AgentId) -> Option<Arc<CredentialSet>> {
        if !self.policy.refresh_expired {
            return None;
        }

        let lock = self.refresh_lock(agent);
        let _guard = lock.lock().await;

        // Whoever held the lock may have refreshed already, or a grant landed
        let stale = match self.store.lookup(agent) {
            Lookup::Fresh(credentials) => return Some(credentials),
            Lookup::Missing => return None,
            Lookup::Expired(stale) => stale,
        };
        if stale.refresh_token.is_none() {
            return None;
        }

        let refreshed = match self.authority.refresh(&self.provider, &stale).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(agent = %agent, error = %e, "Credential refresh failed");
                return None;
            }
        };

        let owned = agent.clone();
        let expected = Arc::clone(&stale);
        let replaced = self
            .write(move |store| store.replace_if_current(&owned, &expected, refreshed))
            .await;

        match replaced {
            Ok(Some(stored)) => {
                debug!(agent = %agent, "Refreshed expired credentials");
                Some(stored)
            }
            Ok(None) => {
                // A newer grant (or a revoke) won; use whatever is there now
                debug!(agent = %agent, "Refresh superseded by a newer write");
                self.store.get(agent)
            }
            Err(e) => {
                warn!(agent = %agent, error = %e, "Failed to store refreshed credentials");
                None
            }
        }
    }

    fn refresh_lock(&self, agent: &AgentId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.refreshing
                .entry(agent.as_str().to_string())
                .or_default()
                .value(),
        )
    }

    /// Run a store write, off the async runtime when it touches disk.
    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&CredentialStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.store.is_persistent() {
            return f(self.store.as_ref());
        }
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .context("Credential store task failed")?
    }
}
