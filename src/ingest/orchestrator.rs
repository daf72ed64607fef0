//! Ingestion orchestrator — turns one push notification into scored,
//! stored messages and an advanced cursor.
//!
//! State machine per (user, notification):
//! `Received → Resolved → {Skipped | Baseline | Fetched → Scored →
//! {Stored | Discarded}} → Acknowledged`.
//!
//! The cursor is advanced only after the whole batch has been processed;
//! a crash mid-batch leaves it at the old value so redelivery reprocesses
//! the batch. Store operations are idempotent upserts, so reprocessing is
//! harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::IngestConfig;
use crate::error::{DatabaseError, IngestError};
use crate::ingest::locks::UserLocks;
use crate::ingest::outcome::NotificationOutcome;
use crate::mail::{HistoryFetcher, MessageFetcher};
use crate::rules::{RuleRepository, RuleScorer, ScoreReport};
use crate::store::{Database, HistoryId, ScoredMessageRecord, UserAccount};

/// Aggregate score at or above which a scored message is persisted.
pub const STORAGE_THRESHOLD: f64 = 50.0;

/// Consumes notifications and drives the fetch → score → store → advance
/// cycle, one user at a time.
pub struct IngestionOrchestrator {
    db: Arc<dyn Database>,
    rules: RuleRepository,
    scorer: RuleScorer,
    history: Arc<dyn HistoryFetcher>,
    messages: Arc<dyn MessageFetcher>,
    locks: UserLocks,
    config: IngestConfig,
}

impl IngestionOrchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        classifier: Arc<dyn Classifier>,
        history: Arc<dyn HistoryFetcher>,
        messages: Arc<dyn MessageFetcher>,
        config: IngestConfig,
    ) -> Self {
        Self {
            rules: RuleRepository::new(Arc::clone(&db)),
            scorer: RuleScorer::new(classifier),
            db,
            history,
            messages,
            locks: UserLocks::new(),
            config,
        }
    }

    /// Handle one "new mail" notification.
    ///
    /// Holds the user's lock for the full call: concurrent notifications
    /// for the same user serialize here, which is what keeps the cursor
    /// monotonic under out-of-order delivery.
    pub async fn handle_notification(
        &self,
        email_address: &str,
        incoming: HistoryId,
    ) -> Result<NotificationOutcome, IngestError> {
        let _guard = self.locks.acquire(email_address).await;

        let user = self
            .db
            .get_user(email_address)
            .await
            .map_err(IngestError::Storage)?;
        let Some(user) = user else {
            warn!(email = %email_address, "Notification for unknown user, dropping");
            return Ok(NotificationOutcome::UnknownUser);
        };

        match user.last_history_id {
            Some(stored) if incoming <= stored => {
                debug!(
                    email = %user.email,
                    incoming,
                    stored,
                    "Stale or duplicate notification, skipping"
                );
                Ok(NotificationOutcome::Skipped { stored })
            }
            None => {
                // First notification ever: store a baseline to diff
                // against next time. Nothing to fetch yet.
                self.advance_cursor(&user.email, incoming).await?;
                info!(email = %user.email, baseline = incoming, "Cursor baseline established");
                Ok(NotificationOutcome::Baseline { stored: incoming })
            }
            Some(stored) => self.process_delta(&user, stored, incoming).await,
        }
    }

    /// Fetch, score, and store everything between the stored cursor and
    /// the incoming position, then advance.
    async fn process_delta(
        &self,
        user: &UserAccount,
        stored_cursor: HistoryId,
        incoming: HistoryId,
    ) -> Result<NotificationOutcome, IngestError> {
        // Diff from the cursor we have, not the position we were told.
        let message_ids = self
            .history
            .fetch_added_message_ids(user, stored_cursor)
            .await
            .map_err(IngestError::History)?;

        if message_ids.is_empty() {
            // Valid: the event that bumped the history id was not a new
            // message (label change etc.). Advance and finish.
            self.advance_cursor(&user.email, incoming).await?;
            debug!(email = %user.email, incoming, "Empty delta, cursor advanced");
            return Ok(NotificationOutcome::EmptyDelta {
                advanced_to: incoming,
            });
        }

        // One forest snapshot per notification, shared by every message
        // in the batch.
        let forest = self
            .rules
            .load_forest(&user.email)
            .await
            .map_err(IngestError::Storage)?;
        if forest.is_empty() {
            debug!(email = %user.email, "User has no rules; batch scores will all be zero");
        }

        let fetched = message_ids.len();
        let mut scored = 0usize;
        let mut stored = 0usize;

        // Oldest-first, as returned by the history fetcher.
        for message_id in &message_ids {
            let details = match self.messages.fetch_message(user, message_id).await {
                Ok(details) => details,
                Err(e) => {
                    // Localized failure: skip this message, keep the
                    // batch alive. Redelivery will retry it because the
                    // cursor has not moved yet.
                    warn!(
                        email = %user.email,
                        message_id = %message_id,
                        error = %e,
                        "Failed to fetch message content, skipping"
                    );
                    continue;
                }
            };

            let report = if forest.is_empty() {
                ScoreReport::empty()
            } else {
                self.scorer
                    .evaluate(&details.classifiable_content(), &forest)
                    .await
            };
            scored += 1;

            debug!(
                email = %user.email,
                message_id = %details.id,
                aggregate = report.aggregate,
                "Message scored"
            );

            if report.aggregate >= STORAGE_THRESHOLD {
                let record = ScoredMessageRecord {
                    owner_id: user.email.clone(),
                    message_id: details.id.clone(),
                    sender: details.sender.clone(),
                    subject: details.subject.clone(),
                    snippet: details.snippet.clone(),
                    aggregate_score: report.aggregate,
                    breakdown: serde_json::to_string(&report.breakdown)
                        .unwrap_or_else(|_| "[]".to_string()),
                    created_at: Utc::now(),
                };
                // A store failure aborts the batch with the cursor
                // unmoved; the idempotent upsert makes the redelivered
                // rerun safe.
                self.db
                    .insert_scored_message(&record)
                    .await
                    .map_err(IngestError::Storage)?;
                stored += 1;
            }
        }

        self.advance_cursor(&user.email, incoming).await?;

        info!(
            email = %user.email,
            incoming,
            fetched,
            scored,
            stored,
            "Notification processed"
        );
        Ok(NotificationOutcome::Processed {
            advanced_to: incoming,
            fetched,
            scored,
            stored,
        })
    }

    /// Cursor write with bounded retries and jittered backoff.
    async fn advance_cursor(&self, email: &str, to: HistoryId) -> Result<(), IngestError> {
        let mut last_err: Option<DatabaseError> = None;

        for attempt in 0..self.config.cursor_write_attempts {
            if attempt > 0 {
                let backoff = self.config.cursor_retry_base * 2u32.pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
            }

            match self.db.set_last_history_id(email, to).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        email = %email,
                        to,
                        attempt = attempt + 1,
                        error = %e,
                        "Cursor write failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(IngestError::CursorWrite(last_err.unwrap_or_else(|| {
            DatabaseError::Query("cursor write never attempted".into())
        })))
    }
}
