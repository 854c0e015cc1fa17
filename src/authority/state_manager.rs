//! CSRF state for pending challenges.
//!
//! Each challenge URL carries a single-use state token bound to the provider
//! and agent it was issued for. The callback is only accepted with a live
//! token, and the agent to credit is taken from the token, never from the
//! callback request.

use crate::credentials::AgentId;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A challenge that has been handed out and not yet redeemed.
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub provider: String,
    pub agent: AgentId,
    pub expires_at: DateTime<Utc>,
}

impl StateEntry {
    fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Outstanding state tokens. Cloning shares the same table.
#[derive(Clone)]
pub struct StateManager {
    pending: Arc<DashMap<String, StateEntry>>,
    ttl: Duration,
}

impl StateManager {
    /// `ttl_seconds`: how long a challenge URL stays redeemable.
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Issue a fresh token (UUID v4) for `agent` at `provider`.
    ///
    /// Every call yields a distinct token; earlier ones stay valid until
    /// redeemed or expired.
    pub fn issue(&self, provider: &str, agent: &AgentId) -> String {
        let token = Uuid::new_v4().to_string();
        let entry = StateEntry {
            provider: provider.to_string(),
            agent: agent.clone(),
            expires_at: Utc::now() + self.ttl,
        };
        self.pending.insert(token.clone(), entry);
        token
    }

    /// Take `token` out of the table. None if it was never issued, already
    /// redeemed, or has expired.
    pub fn redeem(&self, token: &str) -> Option<StateEntry> {
        self.pending
            .remove(token)
            .map(|(_, entry)| entry)
            .filter(|entry| entry.is_live_at(Utc::now()))
    }

    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.pending.retain(|_, entry| entry.is_live_at(now));
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

/// Purge expired states every `interval_seconds`. Runs until the task is dropped.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        ticker.tick().await;
        manager.purge_expired();
        tracing::debug!(outstanding = manager.outstanding(), "Purged expired OAuth states");
    }
}
