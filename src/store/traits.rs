//! Backend-agnostic `Database` trait — single async interface for all
//! persistence: user accounts and cursors, rule rows, scored messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::rules::model::RuleRow;

/// Opaque, totally-ordered position in a user's mailbox event stream.
pub type HistoryId = u64;

/// A user account record.
///
/// `last_history_id` is the user's cursor: the last fully-processed point
/// in their event stream. It is mutated exclusively by the ingestion
/// orchestrator and never decreases.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub email: String,
    pub name: Option<String>,
    pub last_history_id: Option<HistoryId>,
    /// Opaque reference into the credential subsystem.
    pub token_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted scored message — only written when the aggregate score
/// clears the storage threshold.
#[derive(Debug, Clone)]
pub struct ScoredMessageRecord {
    pub owner_id: String,
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub aggregate_score: f64,
    /// Per-rule breakdown, serialized JSON.
    pub breakdown: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Users & cursors ─────────────────────────────────────────────

    /// Insert a new user with no cursor.
    async fn insert_user(
        &self,
        email: &str,
        name: Option<&str>,
        token_ref: Option<&str>,
    ) -> Result<UserAccount, DatabaseError>;

    /// Look up a user by mailbox address.
    async fn get_user(&self, email: &str) -> Result<Option<UserAccount>, DatabaseError>;

    /// All known users (for watch renewal).
    async fn list_users(&self) -> Result<Vec<UserAccount>, DatabaseError>;

    /// Advance a user's cursor. Writing the same value again is a no-op.
    async fn set_last_history_id(
        &self,
        email: &str,
        history_id: HistoryId,
    ) -> Result<(), DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// Insert a rule row.
    async fn insert_rule_row(&self, row: &RuleRow) -> Result<(), DatabaseError>;

    /// Get one of an owner's rule rows by id.
    async fn get_rule_row(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<RuleRow>, DatabaseError>;

    /// All rule rows for an owner, flat. Empty vec if the owner has none.
    async fn list_rule_rows(&self, owner_id: &str) -> Result<Vec<RuleRow>, DatabaseError>;

    /// Overwrite a rule row's mutable fields (name, description,
    /// priority, position, updated_at).
    async fn update_rule_row(&self, row: &RuleRow) -> Result<(), DatabaseError>;

    /// Delete one of an owner's rule rows. Returns whether a row existed.
    async fn delete_rule_row(&self, owner_id: &str, id: &str) -> Result<bool, DatabaseError>;

    // ── Scored messages ─────────────────────────────────────────────

    /// Insert a scored message. Idempotent: re-inserting the same
    /// `(owner_id, message_id)` replaces the existing record.
    async fn insert_scored_message(
        &self,
        record: &ScoredMessageRecord,
    ) -> Result<(), DatabaseError>;

    /// Latest scored messages, most recent first, optionally scoped to
    /// one owner.
    async fn recent_scored_messages(
        &self,
        owner_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredMessageRecord>, DatabaseError>;

    /// Count of stored messages for an owner.
    async fn count_scored_messages(&self, owner_id: &str) -> Result<u64, DatabaseError>;
}
