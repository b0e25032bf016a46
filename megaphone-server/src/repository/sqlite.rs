//! SQLite implementation of `BroadcastRepository`.
//!
//! Durable storage that survives service restarts. Synchronous rusqlite
//! operations run under `tokio::task::spawn_blocking` so they never block
//! the async runtime.
//!
//! # Schema Versioning
//!
//! A `schema_version` table tracks the schema version. When the schema needs
//! to change, increment `CURRENT_SCHEMA_VERSION` and add a migration in
//! `run_migrations()`. Migrations run sequentially from the current version
//! to the target version.
//!
//! # Coordination
//!
//! Status transitions and recipient completion are conditional `UPDATE`s
//! (`... WHERE status = 'pending'`, `... WHERE status IN (...)`), so
//! concurrent workers sharing one database coordinate purely through row
//! state; no in-process lock spans more than a single statement.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use megaphone_core::phone::E164;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::warn;

use super::{BroadcastPatch, BroadcastRepository, RepositoryError};
use crate::broadcast::{
    Broadcast, BroadcastId, BroadcastStatus, CampaignId, OrgId, ProgressBreakdown, Recipient,
    RecipientId, RecipientStatus, SenderNumberId, SkipReason,
};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed broadcast repository.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist, and runs any
    /// pending migrations.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    /// - `foreign_keys = ON` so recipient rows cascade-delete with their broadcast
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();

        let path_str = path_ref.to_string_lossy();
        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // WAL can silently stay off on filesystems without shared-memory
        // support, which would break our concurrency assumptions; in-memory
        // databases legitimately report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        if journal_mode.to_lowercase() != "wal" && journal_mode.to_lowercase() != "memory" {
            return Err(RepositoryError::storage(
                "set journal_mode",
                format!("expected WAL journal mode, got {journal_mode}"),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory repository (tests).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> Result<(), RepositoryError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
            [],
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let version: i64 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        if version < CURRENT_SCHEMA_VERSION {
            Self::run_migrations(conn, version)?;
            conn.execute("DELETE FROM schema_version", [])
                .map_err(|e| RepositoryError::storage("clear schema version", e.to_string()))?;
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![CURRENT_SCHEMA_VERSION],
            )
            .map_err(|e| RepositoryError::storage("set schema version", e.to_string()))?;
        } else if version > CURRENT_SCHEMA_VERSION {
            warn!(
                "Database schema version {} is newer than supported version {}",
                version, CURRENT_SCHEMA_VERSION
            );
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS broadcasts (
                    id TEXT PRIMARY KEY,
                    org_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    message_template TEXT NOT NULL,
                    sender_id TEXT NOT NULL,
                    campaign_id TEXT,
                    status TEXT NOT NULL,
                    scheduled_at INTEGER,
                    total_recipients INTEGER NOT NULL,
                    opted_out_skipped INTEGER NOT NULL,
                    created_by TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    completed_at INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_broadcasts_status
                    ON broadcasts(status);
                CREATE INDEX IF NOT EXISTS idx_broadcasts_due
                    ON broadcasts(scheduled_at) WHERE status = 'scheduled';

                CREATE TABLE IF NOT EXISTS recipients (
                    id TEXT PRIMARY KEY,
                    broadcast_id TEXT NOT NULL
                        REFERENCES broadcasts(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    phone_number TEXT NOT NULL,
                    contact_name TEXT,
                    variables_json TEXT NOT NULL,
                    status TEXT NOT NULL,
                    skip_reason TEXT,
                    delivery_id TEXT,
                    error TEXT,
                    sent_at INTEGER,
                    failed_at INTEGER,
                    UNIQUE (broadcast_id, phone_number)
                );

                CREATE INDEX IF NOT EXISTS idx_recipients_broadcast
                    ON recipients(broadcast_id, position);
                CREATE INDEX IF NOT EXISTS idx_recipients_pending
                    ON recipients(broadcast_id, position) WHERE status = 'pending';
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        Ok(())
    }
}

// =============================================================================
// Row conversion helpers
// =============================================================================

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(value: i64, what: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| RepositoryError::corruption(format!("timestamp {value} for {what}")))
}

fn from_millis_opt(
    value: Option<i64>,
    what: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|v| from_millis(v, what)).transpose()
}

/// Convert a usize limit to i64 for a SQLite LIMIT clause. Very large values
/// would otherwise wrap negative with `as i64` and change LIMIT semantics.
fn limit_to_i64(limit: usize, operation: &'static str) -> Result<i64, RepositoryError> {
    i64::try_from(limit).map_err(|_| {
        RepositoryError::storage(operation, format!("limit {limit} exceeds i64 range"))
    })
}

fn broadcast_from_row(row: &Row<'_>) -> rusqlite::Result<RawBroadcastRow> {
    Ok(RawBroadcastRow {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        message_template: row.get(3)?,
        sender_id: row.get(4)?,
        campaign_id: row.get(5)?,
        status: row.get(6)?,
        scheduled_at: row.get(7)?,
        total_recipients: row.get(8)?,
        opted_out_skipped: row.get(9)?,
        created_by: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

const BROADCAST_COLUMNS: &str = "id, org_id, name, message_template, sender_id, campaign_id, \
     status, scheduled_at, total_recipients, opted_out_skipped, \
     created_by, created_at, updated_at, completed_at";

struct RawBroadcastRow {
    id: String,
    org_id: String,
    name: String,
    message_template: String,
    sender_id: String,
    campaign_id: Option<String>,
    status: String,
    scheduled_at: Option<i64>,
    total_recipients: i64,
    opted_out_skipped: i64,
    created_by: String,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl RawBroadcastRow {
    fn into_broadcast(self) -> Result<Broadcast, RepositoryError> {
        let id = BroadcastId::parse(&self.id)
            .ok_or_else(|| RepositoryError::corruption(format!("broadcast id {}", self.id)))?;
        let status = BroadcastStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::corruption(format!("broadcast status {}", self.status))
        })?;
        let total_recipients = u32::try_from(self.total_recipients)
            .map_err(|_| RepositoryError::corruption("negative total_recipients"))?;
        let opted_out_skipped = u32::try_from(self.opted_out_skipped)
            .map_err(|_| RepositoryError::corruption("negative opted_out_skipped"))?;

        Ok(Broadcast {
            id,
            org_id: OrgId::new(self.org_id),
            name: self.name,
            message_template: self.message_template,
            sender_id: SenderNumberId::new(self.sender_id),
            campaign_id: self.campaign_id.map(CampaignId::new),
            status,
            scheduled_at: from_millis_opt(self.scheduled_at, "scheduled_at")?,
            total_recipients,
            opted_out_skipped,
            created_by: self.created_by,
            created_at: from_millis(self.created_at, "created_at")?,
            updated_at: from_millis(self.updated_at, "updated_at")?,
            completed_at: from_millis_opt(self.completed_at, "completed_at")?,
        })
    }
}

const RECIPIENT_COLUMNS: &str = "id, broadcast_id, phone_number, contact_name, variables_json, \
     status, skip_reason, delivery_id, error, sent_at, failed_at";

fn recipient_from_row(row: &Row<'_>) -> rusqlite::Result<RawRecipientRow> {
    Ok(RawRecipientRow {
        id: row.get(0)?,
        broadcast_id: row.get(1)?,
        phone_number: row.get(2)?,
        contact_name: row.get(3)?,
        variables_json: row.get(4)?,
        status: row.get(5)?,
        skip_reason: row.get(6)?,
        delivery_id: row.get(7)?,
        error: row.get(8)?,
        sent_at: row.get(9)?,
        failed_at: row.get(10)?,
    })
}

struct RawRecipientRow {
    id: String,
    broadcast_id: String,
    phone_number: String,
    contact_name: Option<String>,
    variables_json: String,
    status: String,
    skip_reason: Option<String>,
    delivery_id: Option<String>,
    error: Option<String>,
    sent_at: Option<i64>,
    failed_at: Option<i64>,
}

impl RawRecipientRow {
    fn into_recipient(self) -> Result<Recipient, RepositoryError> {
        let id = RecipientId::parse(&self.id)
            .ok_or_else(|| RepositoryError::corruption(format!("recipient id {}", self.id)))?;
        let broadcast_id = BroadcastId::parse(&self.broadcast_id).ok_or_else(|| {
            RepositoryError::corruption(format!("recipient broadcast id {}", self.broadcast_id))
        })?;
        let phone_number = E164::from_normalized(&self.phone_number).ok_or_else(|| {
            RepositoryError::corruption(format!("recipient number {}", self.phone_number))
        })?;
        let status = RecipientStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::corruption(format!("recipient status {}", self.status))
        })?;
        let skip_reason = self
            .skip_reason
            .map(|raw| {
                SkipReason::parse(&raw)
                    .ok_or_else(|| RepositoryError::corruption(format!("skip reason {raw}")))
            })
            .transpose()?;
        let variables = serde_json::from_str(&self.variables_json)
            .map_err(|_| RepositoryError::corruption("recipient variables JSON"))?;

        Ok(Recipient {
            id,
            broadcast_id,
            phone_number,
            contact_name: self.contact_name,
            variables,
            status,
            skip_reason,
            delivery_id: self.delivery_id,
            error: self.error,
            sent_at: from_millis_opt(self.sent_at, "sent_at")?,
            failed_at: from_millis_opt(self.failed_at, "failed_at")?,
        })
    }
}

// =============================================================================
// BroadcastRepository trait implementation
// =============================================================================

#[async_trait]
impl BroadcastRepository for SqliteRepository {
    async fn insert_broadcast(
        &self,
        broadcast: &Broadcast,
        recipients: &[Recipient],
    ) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let broadcast = broadcast.clone();
        let recipients = recipients.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("insert_broadcast", e.to_string()))?;

            tx.execute(
                "INSERT INTO broadcasts (id, org_id, name, message_template, sender_id, \
                 campaign_id, status, scheduled_at, total_recipients, opted_out_skipped, \
                 created_by, created_at, updated_at, completed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    broadcast.id.to_string(),
                    broadcast.org_id.as_str(),
                    broadcast.name,
                    broadcast.message_template,
                    broadcast.sender_id.as_str(),
                    broadcast.campaign_id.as_ref().map(|c| c.as_str().to_string()),
                    broadcast.status.as_str(),
                    broadcast.scheduled_at.map(millis),
                    broadcast.total_recipients,
                    broadcast.opted_out_skipped,
                    broadcast.created_by,
                    millis(broadcast.created_at),
                    millis(broadcast.updated_at),
                    broadcast.completed_at.map(millis),
                ],
            )
            .map_err(|e| RepositoryError::storage("insert_broadcast", e.to_string()))?;

            for (position, recipient) in recipients.iter().enumerate() {
                let variables_json = serde_json::to_string(&recipient.variables)
                    .map_err(|e| RepositoryError::storage("insert_broadcast", e.to_string()))?;
                tx.execute(
                    "INSERT INTO recipients (id, broadcast_id, position, phone_number, \
                     contact_name, variables_json, status, skip_reason, delivery_id, error, \
                     sent_at, failed_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        recipient.id.to_string(),
                        recipient.broadcast_id.to_string(),
                        position as i64,
                        recipient.phone_number.as_str(),
                        recipient.contact_name,
                        variables_json,
                        recipient.status.as_str(),
                        recipient.skip_reason.map(|r| r.as_str()),
                        recipient.delivery_id,
                        recipient.error,
                        recipient.sent_at.map(millis),
                        recipient.failed_at.map(millis),
                    ],
                )
                .map_err(|e| RepositoryError::storage("insert_broadcast", e.to_string()))?;
            }

            tx.commit()
                .map_err(|e| RepositoryError::storage("insert_broadcast", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("insert_broadcast", e.to_string()))?
    }

    async fn get_broadcast(
        &self,
        id: &BroadcastId,
    ) -> Result<Option<Broadcast>, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let raw = conn
                .query_row(
                    &format!("SELECT {BROADCAST_COLUMNS} FROM broadcasts WHERE id = ?1"),
                    params![id],
                    broadcast_from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get_broadcast", e.to_string()))?;

            raw.map(RawBroadcastRow::into_broadcast).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get_broadcast", e.to_string()))?
    }

    async fn list_recipients(&self, id: &BroadcastId) -> Result<Vec<Recipient>, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients \
                     WHERE broadcast_id = ?1 ORDER BY position"
                ))
                .map_err(|e| RepositoryError::storage("list_recipients", e.to_string()))?;

            let rows = stmt
                .query_map(params![id], recipient_from_row)
                .map_err(|e| RepositoryError::storage("list_recipients", e.to_string()))?;

            let mut recipients = Vec::new();
            for row in rows {
                let raw =
                    row.map_err(|e| RepositoryError::storage("list_recipients", e.to_string()))?;
                recipients.push(raw.into_recipient()?);
            }
            Ok(recipients)
        })
        .await
        .map_err(|e| RepositoryError::storage("list_recipients", e.to_string()))?
    }

    async fn update_details(
        &self,
        id: &BroadcastId,
        patch: &BroadcastPatch,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let patch = patch.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let mut sets = vec!["updated_at = ?1".to_string()];
            let mut values: Vec<rusqlite::types::Value> = vec![millis(now).into()];

            if let Some(name) = patch.name {
                sets.push(format!("name = ?{}", values.len() + 1));
                values.push(name.into());
            }
            if let Some(template) = patch.message_template {
                sets.push(format!("message_template = ?{}", values.len() + 1));
                values.push(template.into());
            }
            if let Some(scheduled_at) = patch.scheduled_at {
                sets.push(format!("scheduled_at = ?{}", values.len() + 1));
                values.push(match scheduled_at {
                    Some(at) => millis(at).into(),
                    None => rusqlite::types::Value::Null,
                });
            }

            let sql = format!(
                "UPDATE broadcasts SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len() + 1
            );
            values.push(id.into());

            let changed = conn
                .execute(&sql, params_from_iter(values))
                .map_err(|e| RepositoryError::storage("update_details", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| RepositoryError::storage("update_details", e.to_string()))?
    }

    async fn transition_status(
        &self,
        id: &BroadcastId,
        expected: &[BroadcastStatus],
        to: BroadcastStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        if expected.is_empty() {
            return Ok(false);
        }

        let conn = self.conn.clone();
        let id = id.to_string();
        let expected: Vec<&'static str> = expected.iter().map(|s| s.as_str()).collect();
        let stamp_completed =
            matches!(to, BroadcastStatus::Completed | BroadcastStatus::Cancelled);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            // Placeholders ?4.. for the expected-status IN list.
            let placeholders: Vec<String> = (0..expected.len())
                .map(|i| format!("?{}", i + 4))
                .collect();
            let sql = format!(
                "UPDATE broadcasts SET status = ?1, updated_at = ?2, \
                 completed_at = CASE WHEN ?3 THEN ?2 ELSE completed_at END \
                 WHERE id = ?{} AND status IN ({})",
                expected.len() + 4,
                placeholders.join(", ")
            );

            let mut values: Vec<rusqlite::types::Value> = vec![
                to.as_str().to_string().into(),
                millis(now).into(),
                stamp_completed.into(),
            ];
            for status in &expected {
                values.push(status.to_string().into());
            }
            values.push(id.into());

            let changed = conn
                .execute(&sql, params_from_iter(values))
                .map_err(|e| RepositoryError::storage("transition_status", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| RepositoryError::storage("transition_status", e.to_string()))?
    }

    async fn delete_broadcast(&self, id: &BroadcastId) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn
                .execute("DELETE FROM broadcasts WHERE id = ?1", params![id])
                .map_err(|e| RepositoryError::storage("delete_broadcast", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| RepositoryError::storage("delete_broadcast", e.to_string()))?
    }

    async fn pending_batch(
        &self,
        id: &BroadcastId,
        limit: usize,
    ) -> Result<Vec<Recipient>, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let limit = limit_to_i64(limit, "pending_batch")?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients \
                     WHERE broadcast_id = ?1 AND status = 'pending' \
                     ORDER BY position LIMIT ?2"
                ))
                .map_err(|e| RepositoryError::storage("pending_batch", e.to_string()))?;

            let rows = stmt
                .query_map(params![id, limit], recipient_from_row)
                .map_err(|e| RepositoryError::storage("pending_batch", e.to_string()))?;

            let mut recipients = Vec::new();
            for row in rows {
                let raw =
                    row.map_err(|e| RepositoryError::storage("pending_batch", e.to_string()))?;
                recipients.push(raw.into_recipient()?);
            }
            Ok(recipients)
        })
        .await
        .map_err(|e| RepositoryError::storage("pending_batch", e.to_string()))?
    }

    async fn mark_sent(
        &self,
        id: &RecipientId,
        delivery_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let delivery_id = delivery_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn
                .execute(
                    "UPDATE recipients SET status = 'sent', delivery_id = ?1, sent_at = ?2 \
                     WHERE id = ?3 AND status = 'pending'",
                    params![delivery_id, millis(now), id],
                )
                .map_err(|e| RepositoryError::storage("mark_sent", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| RepositoryError::storage("mark_sent", e.to_string()))?
    }

    async fn mark_failed(
        &self,
        id: &RecipientId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        // Keep stored provider errors bounded.
        let error: String = error.chars().take(500).collect();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn
                .execute(
                    "UPDATE recipients SET status = 'failed', error = ?1, failed_at = ?2 \
                     WHERE id = ?3 AND status = 'pending'",
                    params![error, millis(now), id],
                )
                .map_err(|e| RepositoryError::storage("mark_failed", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| RepositoryError::storage("mark_failed", e.to_string()))?
    }

    async fn skip_pending(
        &self,
        id: &BroadcastId,
        reason: SkipReason,
    ) -> Result<u64, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn
                .execute(
                    "UPDATE recipients SET status = 'skipped', skip_reason = ?1 \
                     WHERE broadcast_id = ?2 AND status = 'pending'",
                    params![reason.as_str(), id],
                )
                .map_err(|e| RepositoryError::storage("skip_pending", e.to_string()))?;
            Ok(changed as u64)
        })
        .await
        .map_err(|e| RepositoryError::storage("skip_pending", e.to_string()))?
    }

    async fn status_counts(
        &self,
        id: &BroadcastId,
    ) -> Result<ProgressBreakdown, RepositoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM recipients \
                     WHERE broadcast_id = ?1 GROUP BY status",
                )
                .map_err(|e| RepositoryError::storage("status_counts", e.to_string()))?;

            let rows = stmt
                .query_map(params![id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| RepositoryError::storage("status_counts", e.to_string()))?;

            let mut breakdown = ProgressBreakdown::default();
            for row in rows {
                let (status, count) =
                    row.map_err(|e| RepositoryError::storage("status_counts", e.to_string()))?;
                let status = RecipientStatus::parse(&status).ok_or_else(|| {
                    RepositoryError::corruption(format!("recipient status {status}"))
                })?;
                let count = u32::try_from(count)
                    .map_err(|_| RepositoryError::corruption("negative status count"))?;
                match status {
                    RecipientStatus::Pending => breakdown.pending = count,
                    RecipientStatus::Sent => breakdown.sent = count,
                    RecipientStatus::Failed => breakdown.failed = count,
                    RecipientStatus::Skipped => breakdown.skipped = count,
                }
            }
            Ok(breakdown)
        })
        .await
        .map_err(|e| RepositoryError::storage("status_counts", e.to_string()))?
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BroadcastId>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM broadcasts \
                     WHERE status = 'scheduled' AND scheduled_at IS NOT NULL \
                     AND scheduled_at <= ?1 ORDER BY scheduled_at",
                )
                .map_err(|e| RepositoryError::storage("due_scheduled", e.to_string()))?;

            let rows = stmt
                .query_map(params![millis(now)], |row| row.get::<_, String>(0))
                .map_err(|e| RepositoryError::storage("due_scheduled", e.to_string()))?;

            let mut ids = Vec::new();
            for row in rows {
                let raw =
                    row.map_err(|e| RepositoryError::storage("due_scheduled", e.to_string()))?;
                ids.push(BroadcastId::parse(&raw).ok_or_else(|| {
                    RepositoryError::corruption(format!("broadcast id {raw}"))
                })?);
            }
            Ok(ids)
        })
        .await
        .map_err(|e| RepositoryError::storage("due_scheduled", e.to_string()))?
    }

    async fn active_sending(&self) -> Result<Vec<BroadcastId>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT id FROM broadcasts WHERE status = 'sending'")
                .map_err(|e| RepositoryError::storage("active_sending", e.to_string()))?;

            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| RepositoryError::storage("active_sending", e.to_string()))?;

            let mut ids = Vec::new();
            for row in rows {
                let raw =
                    row.map_err(|e| RepositoryError::storage("active_sending", e.to_string()))?;
                ids.push(BroadcastId::parse(&raw).ok_or_else(|| {
                    RepositoryError::corruption(format!("broadcast id {raw}"))
                })?);
            }
            Ok(ids)
        })
        .await
        .map_err(|e| RepositoryError::storage("active_sending", e.to_string()))?
    }
}
