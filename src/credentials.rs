//! Durable storage for embedded-transport session material.
//!
//! Blobs are opaque cryptographic state handed over by the protocol runtime.
//! They are namespaced per instance, written one key at a time (a crash
//! mid-update may leave individual keys stale but never touches unrelated
//! ones), and wiped namespace-at-once so a half-cleared session can never
//! look valid. Values never appear in logs or `Debug` output.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

/// Credential store failure. Callers log and continue: losing a write risks
/// re-pairing after a restart, never a broken running session.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The backing store rejected the operation.
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for CredentialError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Opaque credential blobs keyed per instance namespace.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch one blob, or `None` when absent.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CredentialError>;

    /// Insert or replace one blob. Keys are independent of each other.
    async fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), CredentialError>;

    /// Every key/blob pair in a namespace, used to resume a session.
    async fn load_namespace(
        &self,
        namespace: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, CredentialError>;

    /// Remove a namespace in one shot. Afterwards the session must read as
    /// fully absent.
    async fn wipe(&self, namespace: &str) -> Result<(), CredentialError>;
}

/// SQLite-backed store sharing the service's metadata pool.
pub struct SqliteCredentialStore {
    db: SqlitePool,
}

impl SqliteCredentialStore {
    /// Wrap an open pool. The schema must already exist (see [`crate::store`]).
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

impl std::fmt::Debug for SqliteCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCredentialStore")
            .field("values", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CredentialError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM credentials WHERE namespace = ?1 AND key = ?2")
                .bind(namespace)
                .bind(key)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), CredentialError> {
        sqlx::query(
            "INSERT OR REPLACE INTO credentials (namespace, key, value, updated_at) \
             VALUES (?1, ?2, ?3, datetime('now'))",
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn load_namespace(
        &self,
        namespace: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, CredentialError> {
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT key, value FROM credentials WHERE namespace = ?1")
                .bind(namespace)
                .fetch_all(&self.db)
                .await?;
        Ok(rows)
    }

    async fn wipe(&self, namespace: &str) -> Result<(), CredentialError> {
        // One statement, one implicit transaction: the namespace disappears
        // as a whole or not at all.
        sqlx::query("DELETE FROM credentials WHERE namespace = ?1")
            .bind(namespace)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryCredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("values", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CredentialError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), CredentialError> {
        let mut inner = self.inner.lock().await;
        inner
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn load_namespace(
        &self,
        namespace: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, CredentialError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn wipe(&self, namespace: &str) -> Result<(), CredentialError> {
        let mut inner = self.inner.lock().await;
        inner.remove(namespace);
        Ok(())
    }
}
