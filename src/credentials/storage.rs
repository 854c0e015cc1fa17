//! Encrypted credential persistence using SQLite.
//!
//! Backs a [`CredentialStore`](super::CredentialStore) when credentials must
//! survive a restart. Each row holds one sealed [`CredentialSet`].

use super::{encryption, AgentId, CredentialSet};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Write-through SQLite backend for the credential store.
///
/// # Schema
/// ```sql
/// CREATE TABLE agent_credentials (
///     agent_id TEXT PRIMARY KEY,
///     sealed TEXT NOT NULL,       -- AES-256-GCM over the JSON-encoded set
///     nonce TEXT NOT NULL,
///     created_at TEXT NOT NULL,   -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL    -- ISO 8601 timestamp
/// );
/// ```
///
/// # Security
/// - Master key is held in memory only (from env var)
/// - The whole set is one ciphertext, so a row never decrypts to a partial grant
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl SqliteBackend {
    /// Creates or opens a backend.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn open<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS agent_credentials (
                agent_id TEXT PRIMARY KEY,
                sealed TEXT NOT NULL,
                nonce TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create agent_credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential database lock poisoned"))
    }

    /// Upserts the sealed set for an agent.
    pub fn save(&self, agent: &AgentId, credentials: &CredentialSet) -> Result<()> {
        let (sealed, nonce) = encryption::seal(credentials, &self.encryption_key)
            .context("Failed to seal credentials")?;
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO agent_credentials (agent_id, sealed, nonce, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                ON CONFLICT(agent_id) DO UPDATE SET
                    sealed = excluded.sealed,
                    nonce = excluded.nonce,
                    updated_at = excluded.updated_at
                "#,
                params![agent.as_str(), sealed, nonce, now],
            )
            .context("Failed to persist credentials")?;

        Ok(())
    }

    /// Deletes an agent's row. Returns whether a row existed.
    pub fn delete(&self, agent: &AgentId) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM agent_credentials WHERE agent_id = ?1",
                params![agent.as_str()],
            )
            .context("Failed to delete credentials")?;

        Ok(rows_affected > 0)
    }

    /// Loads every persisted set.
    ///
    /// Rows that fail to decrypt (e.g. after a key rotation) are skipped with a
    /// warning; those agents will simply be challenged again.
    pub fn load_all(&self) -> Result<Vec<(AgentId, CredentialSet)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT agent_id, sealed, nonce FROM agent_credentials ORDER BY agent_id")
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read results")?;

        let mut loaded = Vec::with_capacity(rows.len());
        for (agent_id, sealed, nonce) in rows {
            let agent = match AgentId::new(agent_id) {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(error = %e, "Skipping persisted row with invalid agent id");
                    continue;
                }
            };
            match encryption::open(&sealed, &nonce, &self.encryption_key) {
                Ok(credentials) => loaded.push((agent, credentials)),
                Err(e) => {
                    warn!(agent = %agent, error = %e, "Skipping unreadable persisted credentials")
                }
            }
        }

        Ok(loaded)
    }
}
