//! Per-agent delegated credential storage.
//!
//! Maps an [`AgentId`] to the [`CredentialSet`] granted for it by the
//! authorization authority.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - DashMap<agent, Arc<CredentialSet>>    │
//! │  - Freshness classification              │
//! └─────────────────────────────────────────┘
//!          ↓ (write-through, optional)
//! ┌─────────────────────────────────────────┐
//! │       SqliteBackend                      │
//! │  - One sealed row per agent              │
//! │  - AES-256-GCM over the whole set        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use pagegate::credentials::{AgentId, CredentialSet, CredentialStore};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = CredentialStore::in_memory();
//! let agent = AgentId::new("agent-1")?;
//!
//! store.set(&agent, CredentialSet::new("secret_abc"))?;
//! if let Some(creds) = store.get(&agent) {
//!     println!("scopes: {:?}", creds.scopes);
//! }
//!
//! store.clear(&agent)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! - Entries are `Arc<CredentialSet>`; a write swaps the whole `Arc`, so a
//!   reader holds either the previous or the new set, never a mixture
//! - Writes to one agent only lock that agent's shard
//! - Two concurrent `set` calls for the same agent: the last one applied wins.
//!   Back-to-back grants from the authority race this way and that is accepted
//! - No operation here awaits network I/O

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

mod encryption;
mod storage;
mod store;

pub use storage::SqliteBackend;
pub use store::{CredentialStore, Lookup};

// Re-export encryption functions for testing/utilities
pub use encryption::{open, seal, validate_key};

/// Identifier of a calling agent (tenant).
///
/// Always supplied by the caller's invocation context, never derived.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Validates and wraps an agent identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidAgentId> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(InvalidAgentId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = InvalidAgentId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

/// Returned when an agent id is empty or whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAgentId;

impl fmt::Display for InvalidAgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent id must not be empty")
    }
}

impl std::error::Error for InvalidAgentId {}

/// Delegated-access grant held for one agent.
///
/// Immutable once stored: the store only ever replaces a whole set.
///
/// # Security
/// - `Debug` output redacts both tokens
/// - Encrypted at rest when persistence is enabled
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC)
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Scopes granted by the provider
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Provider-specific grant details (e.g. Notion workspace id)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CredentialSet {
    /// Credential carrying only an access token that never expires.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scopes: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True when the access token is past (or within `leeway` of) its expiry.
    /// Sets without an expiry never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + leeway >= expires_at,
            None => false,
        }
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("metadata", &self.metadata)
            .finish()
    }
}
