use super::{AgentId, CredentialSet, SqliteBackend};
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Freshness classification of an agent's stored credential.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    /// No credential stored for this agent
    Missing,
    /// Stored, but the access token is past (or within leeway of) its expiry.
    /// The raw entry stays in the store until replaced or cleared.
    Expired(Arc<CredentialSet>),
    /// Stored and usable
    Fresh(Arc<CredentialSet>),
}

/// Process-wide agent → credential mapping.
///
/// Constructed explicitly by the host process and shared via `Arc`; dropped
/// on teardown. With a [`SqliteBackend`] attached, every write goes to disk
/// before it becomes visible in memory.
///
/// Writes for one agent are serialized by that agent's own writer lock. The
/// map's shard lock is only taken for the final in-memory swap, so a slow
/// disk write never holds up reads, not even reads of the same agent.
pub struct CredentialStore {
    entries: DashMap<String, Arc<CredentialSet>>,
    writers: DashMap<String, Arc<Mutex<()>>>,
    backend: Option<SqliteBackend>,
    expiry_leeway: Duration,
}

impl CredentialStore {
    /// Empty, memory-only store.
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            writers: DashMap::new(),
            backend: None,
            expiry_leeway: Duration::zero(),
        }
    }

    /// Store backed by `backend`, pre-loaded with everything it holds.
    pub fn with_backend(backend: SqliteBackend) -> Result<Self> {
        let entries = DashMap::new();
        for (agent, credentials) in backend
            .load_all()
            .context("Failed to load persisted credentials")?
        {
            entries.insert(agent.as_str().to_string(), Arc::new(credentials));
        }
        info!(count = entries.len(), "Loaded persisted credentials");

        Ok(Self {
            entries,
            writers: DashMap::new(),
            backend: Some(backend),
            expiry_leeway: Duration::zero(),
        })
    }

    /// Treat tokens expiring within `leeway` as already expired.
    pub fn with_expiry_leeway(mut self, leeway: Duration) -> Self {
        self.expiry_leeway = leeway;
        self
    }

    /// Classifies the agent's current credential.
    pub fn lookup(&self, agent: &AgentId) -> Lookup {
        let Some(credentials) = self.current(agent) else {
            return Lookup::Missing;
        };

        if credentials.is_expired_at(Utc::now(), self.expiry_leeway) {
            Lookup::Expired(credentials)
        } else {
            Lookup::Fresh(credentials)
        }
    }

    /// Returns the agent's credential if present and not expired.
    pub fn get(&self, agent: &AgentId) -> Option<Arc<CredentialSet>> {
        match self.lookup(agent) {
            Lookup::Fresh(credentials) => Some(credentials),
            Lookup::Missing | Lookup::Expired(_) => None,
        }
    }

    /// Replaces the agent's credential wholesale.
    ///
    /// When two `set` calls for one agent race, whichever takes the agent's
    /// writer lock last wins, in memory and on disk alike.
    pub fn set(&self, agent: &AgentId, credentials: CredentialSet) -> Result<()> {
        let writer = self.writer(agent);
        let _guard = lock_writer(&writer)?;

        self.commit(agent, credentials)?;
        debug!(agent = %agent, "Credential stored");
        Ok(())
    }

    /// Replaces the agent's credential only if the stored one is still
    /// `expected` (the same `Arc`, not merely an equal set).
    ///
    /// Returns the stored `Arc` on success, `None` if something else was
    /// written (or the entry cleared) since `expected` was read.
    pub fn replace_if_current(
        &self,
        agent: &AgentId,
        expected: &Arc<CredentialSet>,
        credentials: CredentialSet,
    ) -> Result<Option<Arc<CredentialSet>>> {
        let writer = self.writer(agent);
        let _guard = lock_writer(&writer)?;

        match self.current(agent) {
            Some(current) if Arc::ptr_eq(&current, expected) => {}
            _ => {
                debug!(agent = %agent, "Credential changed underneath, not replacing");
                return Ok(None);
            }
        }

        let stored = self.commit(agent, credentials)?;
        debug!(agent = %agent, "Credential replaced");
        Ok(Some(stored))
    }

    /// Removes the agent's credential. Clearing an absent agent is a no-op.
    pub fn clear(&self, agent: &AgentId) -> Result<()> {
        let writer = self.writer(agent);
        let _guard = lock_writer(&writer)?;

        if let Some(backend) = &self.backend {
            backend.delete(agent)?;
        }
        if self.entries.remove(agent.as_str()).is_some() {
            debug!(agent = %agent, "Credential cleared");
        }
        Ok(())
    }

    /// Number of agents with a stored credential (fresh or expired).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Agents with a stored credential, in no particular order.
    pub fn agents(&self) -> Vec<AgentId> {
        self.entries
            .iter()
            .filter_map(|entry| AgentId::new(entry.key().as_str()).ok())
            .collect()
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    fn current(&self, agent: &AgentId) -> Option<Arc<CredentialSet>> {
        self.entries
            .get(agent.as_str())
            .map(|entry| Arc::clone(entry.value()))
    }

    fn writer(&self, agent: &AgentId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.writers
                .entry(agent.as_str().to_string())
                .or_default()
                .value(),
        )
    }

    /// Disk first, then memory. Caller holds the agent's writer lock.
    fn commit(&self, agent: &AgentId, credentials: CredentialSet) -> Result<Arc<CredentialSet>> {
        if let Some(backend) = &self.backend {
            backend.save(agent, &credentials)?;
        }
        let stored = Arc::new(credentials);
        self.entries
            .insert(agent.as_str().to_string(), Arc::clone(&stored));
        Ok(stored)
    }
}

fn lock_writer(writer: &Mutex<()>) -> Result<MutexGuard<'_, ()>> {
    writer
        .lock()
        .map_err(|_| anyhow!("Credential writer lock poisoned"))
}
