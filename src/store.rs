//! SQLite-backed persistence for instance metadata and webhook subscriptions.
//!
//! Instances and their webhooks must survive a process restart so the boot
//! path can rebuild and reconnect every account. Writes are low-frequency,
//! so plain queries against the pool are enough.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::transport::{GatewayBinding, TransportFamily};
use crate::types::{EventKind, Webhook};

/// Open (creating if needed) the database at `path` and ensure the schema.
///
/// # Errors
///
/// Returns an error when the file cannot be opened or the schema cannot be
/// created.
pub async fn open(path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {path}"))?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Open an in-memory database with the schema applied.
///
/// Pinned to a single connection: every pooled connection would otherwise
/// get its own empty in-memory database.
///
/// # Errors
///
/// Returns an error when the pool or schema cannot be created.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("failed to open in-memory database")?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables if they do not exist yet.
///
/// # Errors
///
/// Returns an error when a DDL statement fails.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS instances ( \
             id TEXT PRIMARY KEY, \
             family TEXT NOT NULL, \
             gateway_instance_id TEXT, \
             gateway_token TEXT, \
             created_at TEXT NOT NULL, \
             updated_at TEXT NOT NULL \
         )",
    )
    .execute(pool)
    .await
    .context("failed to create instances table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS webhooks ( \
             id TEXT PRIMARY KEY, \
             instance_id TEXT NOT NULL, \
             url TEXT NOT NULL, \
             events TEXT NOT NULL, \
             created_at TEXT NOT NULL \
         )",
    )
    .execute(pool)
    .await
    .context("failed to create webhooks table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS credentials ( \
             namespace TEXT NOT NULL, \
             key TEXT NOT NULL, \
             value BLOB NOT NULL, \
             updated_at TEXT NOT NULL, \
             PRIMARY KEY (namespace, key) \
         )",
    )
    .execute(pool)
    .await
    .context("failed to create credentials table")?;

    Ok(())
}

/// Persisted description of one instance.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    /// Registry id.
    pub id: String,
    /// Adapter family.
    pub family: TransportFamily,
    /// Remote binding, gateway family only.
    pub gateway: Option<GatewayBinding>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// Record for a freshly created instance.
    pub fn new(id: String, family: TransportFamily, gateway: Option<GatewayBinding>) -> Self {
        Self {
            id,
            family,
            gateway,
            created_at: Utc::now(),
        }
    }
}

/// Metadata persistence for instances and their webhooks.
pub struct MetaStore {
    db: SqlitePool,
}

impl MetaStore {
    /// Wrap an open pool with the schema applied.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert or refresh an instance record.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails.
    pub async fn save_instance(&self, record: &InstanceRecord) -> Result<()> {
        let (gateway_id, gateway_token) = match &record.gateway {
            Some(binding) => (
                Some(binding.remote_instance_id.clone()),
                Some(binding.token.clone()),
            ),
            None => (None, None),
        };
        sqlx::query(
            "INSERT OR REPLACE INTO instances \
                 (id, family, gateway_instance_id, gateway_token, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
        )
        .bind(&record.id)
        .bind(record.family.as_str())
        .bind(gateway_id)
        .bind(gateway_token)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.db)
        .await
        .context("failed to persist instance metadata")?;

        debug!(instance = %record.id, family = record.family.as_str(), "instance metadata saved");
        Ok(())
    }

    /// Delete an instance record and all of its webhooks.
    ///
    /// # Errors
    ///
    /// Returns an error when a delete fails.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM webhooks WHERE instance_id = ?1")
            .bind(instance_id)
            .execute(&self.db)
            .await
            .context("failed to delete instance webhooks")?;
        sqlx::query("DELETE FROM instances WHERE id = ?1")
            .bind(instance_id)
            .execute(&self.db)
            .await
            .context("failed to delete instance metadata")?;
        Ok(())
    }

    /// All persisted instance records. Rows with an unknown family label are
    /// skipped with a warning rather than failing the whole load.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let rows: Vec<(String, String, Option<String>, Option<String>, String)> = sqlx::query_as(
            "SELECT id, family, gateway_instance_id, gateway_token, created_at \
             FROM instances ORDER BY created_at",
        )
        .fetch_all(&self.db)
        .await
        .context("failed to list instances")?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, family, gateway_id, gateway_token, created_at) in rows {
            let Some(family) = TransportFamily::parse(&family) else {
                warn!(instance = %id, family = %family, "skipping instance with unknown family");
                continue;
            };
            let gateway = match (gateway_id, gateway_token) {
                (Some(remote_instance_id), Some(token)) => Some(GatewayBinding {
                    remote_instance_id,
                    token,
                }),
                _ => None,
            };
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            records.push(InstanceRecord {
                id,
                family,
                gateway,
                created_at,
            });
        }
        Ok(records)
    }

    /// Persist one webhook subscription.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails.
    pub async fn save_webhook(&self, instance_id: &str, webhook: &Webhook) -> Result<()> {
        let events =
            serde_json::to_string(&webhook.events).context("failed to encode event filter")?;
        sqlx::query(
            "INSERT OR REPLACE INTO webhooks (id, instance_id, url, events, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&webhook.id)
        .bind(instance_id)
        .bind(&webhook.url)
        .bind(events)
        .bind(webhook.created_at.to_rfc3339())
        .execute(&self.db)
        .await
        .context("failed to persist webhook")?;
        Ok(())
    }

    /// Delete one webhook subscription. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns an error when the delete fails.
    pub async fn delete_webhook(&self, instance_id: &str, webhook_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = ?1 AND instance_id = ?2")
            .bind(webhook_id)
            .bind(instance_id)
            .execute(&self.db)
            .await
            .context("failed to delete webhook")?;
        Ok(result.rows_affected() > 0)
    }

    /// All webhooks registered on an instance, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn webhooks_for(&self, instance_id: &str) -> Result<Vec<Webhook>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, url, events, created_at FROM webhooks \
             WHERE instance_id = ?1 ORDER BY created_at",
        )
        .bind(instance_id)
        .fetch_all(&self.db)
        .await
        .context("failed to list webhooks")?;

        let mut webhooks = Vec::with_capacity(rows.len());
        for (id, url, events, created_at) in rows {
            let events: Vec<EventKind> = serde_json::from_str(&events).unwrap_or_default();
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            webhooks.push(Webhook {
                id,
                url,
                events,
                created_at,
            });
        }
        Ok(webhooks)
    }
}
