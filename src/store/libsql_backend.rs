//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. The in-memory variant
//! backs the test suite.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::rules::model::{RulePriority, RuleRow};
use crate::store::migrations;
use crate::store::traits::{Database, HistoryId, ScoredMessageRecord, UserAccount};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const USER_COLUMNS: &str = "email, name, last_history_id, token_ref, created_at";

fn row_to_user(row: &libsql::Row) -> Result<UserAccount, libsql::Error> {
    let last_history_id: Option<i64> = row.get(2).ok();
    let created_str: String = row.get(4)?;
    Ok(UserAccount {
        email: row.get(0)?,
        name: row.get(1).ok(),
        last_history_id: last_history_id.map(|v| v as HistoryId),
        token_ref: row.get(3).ok(),
        created_at: parse_datetime(&created_str),
    })
}

const RULE_COLUMNS: &str =
    "id, owner_id, parent_id, name, description, priority, position, created_at, updated_at";

fn row_to_rule(row: &libsql::Row) -> Result<RuleRow, libsql::Error> {
    let priority_str: String = row.get(5)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;
    Ok(RuleRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        parent_id: row.get(2).ok(),
        name: row.get(3)?,
        description: row.get(4)?,
        priority: RulePriority::from_str_lossy(&priority_str),
        position: row.get(6)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const SCORED_COLUMNS: &str =
    "owner_id, message_id, sender, subject, snippet, aggregate_score, breakdown, created_at";

fn row_to_scored(row: &libsql::Row) -> Result<ScoredMessageRecord, libsql::Error> {
    let created_str: String = row.get(7)?;
    Ok(ScoredMessageRecord {
        owner_id: row.get(0)?,
        message_id: row.get(1)?,
        sender: row.get(2)?,
        subject: row.get(3)?,
        snippet: row.get(4)?,
        aggregate_score: row.get(5)?,
        breakdown: row.get(6)?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn insert_user(
        &self,
        email: &str,
        name: Option<&str>,
        token_ref: Option<&str>,
    ) -> Result<UserAccount, DatabaseError> {
        let now = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO users (email, name, last_history_id, token_ref, created_at)
                 VALUES (?1, ?2, NULL, ?3, ?4)",
                params![email, opt_text(name), opt_text(token_ref), now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_user: {e}")))?;

        debug!(email = %email, "User inserted");
        Ok(UserAccount {
            email: email.to_string(),
            name: name.map(String::from),
            last_history_id: None,
            token_ref: token_ref.map(String::from),
            created_at: now,
        })
    }

    async fn get_user(&self, email: &str) -> Result<Option<UserAccount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let user = row_to_user(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_user row parse: {e}")))?;
                Ok(Some(user))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn list_users(&self) -> Result<Vec<UserAccount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_users: {e}")))?;

        let mut users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_user(&row) {
                Ok(user) => users.push(user),
                Err(e) => tracing::warn!("Skipping user row: {e}"),
            }
        }
        Ok(users)
    }

    async fn set_last_history_id(
        &self,
        email: &str,
        history_id: HistoryId,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE users SET last_history_id = ?1 WHERE email = ?2",
                params![history_id as i64, email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_last_history_id: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: email.into(),
            });
        }
        debug!(email = %email, history_id, "Cursor advanced");
        Ok(())
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn insert_rule_row(&self, row: &RuleRow) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO rules ({RULE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    row.id.as_str(),
                    row.owner_id.as_str(),
                    opt_text(row.parent_id.as_deref()),
                    row.name.as_str(),
                    row.description.as_str(),
                    row.priority.as_str(),
                    row.position,
                    row.created_at.to_rfc3339(),
                    row.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_rule_row: {e}")))?;
        Ok(())
    }

    async fn get_rule_row(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<RuleRow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE owner_id = ?1 AND id = ?2"),
                params![owner_id, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_rule_row: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let rule = row_to_rule(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_rule_row parse: {e}")))?;
                Ok(Some(rule))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_rule_row: {e}"))),
        }
    }

    async fn list_rule_rows(&self, owner_id: &str) -> Result<Vec<RuleRow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM rules WHERE owner_id = ?1
                     ORDER BY position ASC, created_at ASC"
                ),
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_rule_rows: {e}")))?;

        let mut result = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_rule(&row) {
                Ok(rule) => result.push(rule),
                Err(e) => tracing::warn!("Skipping rule row: {e}"),
            }
        }
        Ok(result)
    }

    async fn update_rule_row(&self, row: &RuleRow) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE rules SET name = ?1, description = ?2, priority = ?3,
                 position = ?4, updated_at = ?5
                 WHERE owner_id = ?6 AND id = ?7",
                params![
                    row.name.as_str(),
                    row.description.as_str(),
                    row.priority.as_str(),
                    row.position,
                    Utc::now().to_rfc3339(),
                    row.owner_id.as_str(),
                    row.id.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule_row: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "rule".into(),
                id: row.id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_rule_row(&self, owner_id: &str, id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM rules WHERE owner_id = ?1 AND id = ?2",
                params![owner_id, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule_row: {e}")))?;
        Ok(affected > 0)
    }

    // ── Scored messages ─────────────────────────────────────────────

    async fn insert_scored_message(
        &self,
        record: &ScoredMessageRecord,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO scored_messages ({SCORED_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (owner_id, message_id) DO UPDATE SET
                       sender = excluded.sender,
                       subject = excluded.subject,
                       snippet = excluded.snippet,
                       aggregate_score = excluded.aggregate_score,
                       breakdown = excluded.breakdown"
                ),
                params![
                    record.owner_id.as_str(),
                    record.message_id.as_str(),
                    record.sender.as_str(),
                    record.subject.as_str(),
                    record.snippet.as_str(),
                    record.aggregate_score,
                    record.breakdown.as_str(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_scored_message: {e}")))?;

        debug!(
            owner = %record.owner_id,
            message_id = %record.message_id,
            score = record.aggregate_score,
            "Scored message stored"
        );
        Ok(())
    }

    async fn recent_scored_messages(
        &self,
        owner_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredMessageRecord>, DatabaseError> {
        let mut rows = match owner_id {
            Some(owner) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {SCORED_COLUMNS} FROM scored_messages
                         WHERE owner_id = ?1
                         ORDER BY created_at DESC, message_id DESC LIMIT ?2"
                    ),
                    params![owner, limit as i64],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {SCORED_COLUMNS} FROM scored_messages
                         ORDER BY created_at DESC, message_id DESC LIMIT ?1"
                    ),
                    params![limit as i64],
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("recent_scored_messages: {e}")))?;

        let mut result = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_scored(&row) {
                Ok(record) => result.push(record),
                Err(e) => tracing::warn!("Skipping scored message row: {e}"),
            }
        }
        Ok(result)
    }

    async fn count_scored_messages(&self, owner_id: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM scored_messages WHERE owner_id = ?1",
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_scored_messages: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count parse: {e}")))?;
                Ok(count as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_scored_messages: {e}"))),
        }
    }
}
