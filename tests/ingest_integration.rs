//! Integration tests for the ingestion orchestrator and webhook boundary.
//!
//! Each test wires the real orchestrator to an in-memory database with
//! stub mail/classifier collaborators, then drives notifications through
//! it and asserts on cursors and stored records.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::Mutex;
use tokio::time::timeout;

use mailsift::classifier::{Classifier, LabelScore};
use mailsift::config::IngestConfig;
use mailsift::error::{ClassifierError, MailApiError};
use mailsift::ingest::{IngestionOrchestrator, NotificationOutcome};
use mailsift::mail::{HistoryFetcher, MessageDetails, MessageFetcher};
use mailsift::rules::{NewRule, RulePriority, RuleRepository};
use mailsift::server::{AppState, api_routes};
use mailsift::store::{Database, HistoryId, LibSqlBackend, UserAccount};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER: &str = "alice@example.com";

// ── Stub collaborators ──────────────────────────────────────────────

/// History fetcher scripted per start cursor.
#[derive(Default)]
struct ScriptedHistory {
    responses: HashMap<HistoryId, Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedHistory {
    fn with(mut self, start: HistoryId, ids: &[&str]) -> Self {
        self.responses
            .insert(start, ids.iter().map(|s| s.to_string()).collect());
        self
    }
}

#[async_trait]
impl HistoryFetcher for ScriptedHistory {
    async fn fetch_added_message_ids(
        &self,
        _user: &UserAccount,
        start: HistoryId,
    ) -> Result<Vec<String>, MailApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses.get(&start).cloned().unwrap_or_default())
    }
}

/// Message fetcher with canned content; listed ids fail to fetch.
#[derive(Default)]
struct StubMessages {
    bodies: HashMap<String, String>,
    failing: HashSet<String>,
    /// Order in which message fetches were attempted.
    fetch_log: Mutex<Vec<String>>,
}

impl StubMessages {
    fn with(mut self, id: &str, body: &str) -> Self {
        self.bodies.insert(id.to_string(), body.to_string());
        self
    }

    fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }
}

#[async_trait]
impl MessageFetcher for StubMessages {
    async fn fetch_message(
        &self,
        _user: &UserAccount,
        message_id: &str,
    ) -> Result<MessageDetails, MailApiError> {
        self.fetch_log.lock().await.push(message_id.to_string());
        if self.failing.contains(message_id) {
            return Err(MailApiError::BadStatus {
                endpoint: format!("messages/{message_id}"),
                status: 500,
            });
        }
        Ok(MessageDetails {
            id: message_id.to_string(),
            sender: "sender@example.com".to_string(),
            subject: format!("subject of {message_id}"),
            snippet: self
                .bodies
                .get(message_id)
                .cloned()
                .unwrap_or_else(|| "generic snippet".to_string()),
        })
    }
}

/// Classifier that scores a label high when the content contains the
/// label's distinguishing word.
struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        content: &str,
        labels: &[String],
    ) -> Result<Vec<LabelScore>, ClassifierError> {
        Ok(labels
            .iter()
            .map(|label| {
                // A label "emails about invoices" matches content
                // containing "invoices".
                let keyword = label.rsplit(' ').next().unwrap_or(label);
                let score = if content.contains(keyword) { 0.9 } else { 0.1 };
                LabelScore {
                    label: label.clone(),
                    score,
                }
            })
            .collect())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    orchestrator: Arc<IngestionOrchestrator>,
    db: Arc<dyn Database>,
    rules: RuleRepository,
}

async fn harness(history: ScriptedHistory, messages: StubMessages) -> Harness {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    db.insert_user(USER, Some("Alice"), None).await.unwrap();

    let orchestrator = Arc::new(IngestionOrchestrator::new(
        Arc::clone(&db),
        Arc::new(KeywordClassifier),
        Arc::new(history),
        Arc::new(messages),
        IngestConfig::default(),
    ));

    Harness {
        orchestrator,
        rules: RuleRepository::new(Arc::clone(&db)),
        db,
    }
}

impl Harness {
    async fn cursor(&self) -> Option<HistoryId> {
        self.db.get_user(USER).await.unwrap().unwrap().last_history_id
    }

    async fn stored_count(&self) -> u64 {
        self.db.count_scored_messages(USER).await.unwrap()
    }

    async fn add_rule(&self, name: &str, keyword: &str, priority: RulePriority) {
        self.rules
            .create_rule(
                USER,
                NewRule {
                    name: name.to_string(),
                    description: format!("emails about {keyword}"),
                    priority,
                    parent_id: None,
                    position: 0,
                },
            )
            .await
            .unwrap();
    }
}

// ── Cursor state machine ────────────────────────────────────────────

#[tokio::test]
async fn first_notification_establishes_baseline() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(ScriptedHistory::default(), StubMessages::default()).await;

        let outcome = h.orchestrator.handle_notification(USER, 100).await.unwrap();
        assert!(matches!(outcome, NotificationOutcome::Baseline { stored: 100 }));
        assert_eq!(h.cursor().await, Some(100));
        assert_eq!(h.stored_count().await, 0);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn baseline_does_not_fetch_history() {
    timeout(TEST_TIMEOUT, async {
        let history = ScriptedHistory::default();
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.insert_user(USER, None, None).await.unwrap();
        let history = Arc::new(history);
        let orchestrator = IngestionOrchestrator::new(
            Arc::clone(&db),
            Arc::new(KeywordClassifier),
            Arc::clone(&history) as Arc<dyn HistoryFetcher>,
            Arc::new(StubMessages::default()),
            IngestConfig::default(),
        );

        orchestrator.handle_notification(USER, 100).await.unwrap();
        assert_eq!(history.calls.load(Ordering::SeqCst), 0);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn duplicate_notification_is_skipped_without_side_effects() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(
            ScriptedHistory::default().with(100, &["m1"]),
            StubMessages::default().with("m1", "all about invoices and payments"),
        )
        .await;
        h.add_rule("invoices", "invoices", RulePriority::High).await;
        h.add_rule("payments", "payments", RulePriority::Low).await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        let first = h.orchestrator.handle_notification(USER, 110).await.unwrap();
        assert!(matches!(first, NotificationOutcome::Processed { stored: 1, .. }));
        let count_after_first = h.stored_count().await;

        // Same history id again: Pub/Sub redelivery.
        let second = h.orchestrator.handle_notification(USER, 110).await.unwrap();
        assert!(matches!(second, NotificationOutcome::Skipped { stored: 110 }));
        assert_eq!(h.stored_count().await, count_after_first);
        assert_eq!(h.cursor().await, Some(110));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn out_of_order_notification_never_rewinds_cursor() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(ScriptedHistory::default(), StubMessages::default()).await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        h.orchestrator.handle_notification(USER, 110).await.unwrap();
        assert_eq!(h.cursor().await, Some(110));

        // A delayed, smaller position arrives late.
        let outcome = h.orchestrator.handle_notification(USER, 105).await.unwrap();
        assert!(matches!(outcome, NotificationOutcome::Skipped { stored: 110 }));
        assert_eq!(h.cursor().await, Some(110));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn empty_delta_advances_cursor_and_stores_nothing() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(ScriptedHistory::default(), StubMessages::default()).await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        let outcome = h.orchestrator.handle_notification(USER, 110).await.unwrap();
        assert!(matches!(
            outcome,
            NotificationOutcome::EmptyDelta { advanced_to: 110 }
        ));
        assert_eq!(h.cursor().await, Some(110));
        assert_eq!(h.stored_count().await, 0);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unknown_user_is_dropped_without_creating_a_cursor() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(ScriptedHistory::default(), StubMessages::default()).await;

        let outcome = h
            .orchestrator
            .handle_notification("nobody@example.com", 100)
            .await
            .unwrap();
        assert!(matches!(outcome, NotificationOutcome::UnknownUser));
        assert!(h.db.get_user("nobody@example.com").await.unwrap().is_none());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn concurrent_same_user_notifications_keep_cursor_monotonic() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(
            ScriptedHistory::default().with(100, &["m1"]).with(105, &[]),
            StubMessages::default().with("m1", "plain message"),
        )
        .await;
        h.orchestrator.handle_notification(USER, 100).await.unwrap();

        // Two notifications race; the per-user lock serializes them and
        // whichever order they run in, the cursor must end at 110.
        let a = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move { orchestrator.handle_notification(USER, 110).await })
        };
        let b = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move { orchestrator.handle_notification(USER, 105).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(h.cursor().await, Some(110));
    })
    .await
    .unwrap();
}

// ── Scoring & storage ───────────────────────────────────────────────

#[tokio::test]
async fn aggregate_at_threshold_is_stored() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(
            ScriptedHistory::default().with(100, &["m1"]),
            StubMessages::default().with("m1", "about invoices and payments"),
        )
        .await;
        // High (30) + Low (20) both match → exactly 50.0, the threshold.
        h.add_rule("invoices", "invoices", RulePriority::High).await;
        h.add_rule("payments", "payments", RulePriority::Low).await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        let outcome = h.orchestrator.handle_notification(USER, 110).await.unwrap();
        assert!(matches!(outcome, NotificationOutcome::Processed { stored: 1, .. }));

        let records = h.db.recent_scored_messages(Some(USER), 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].aggregate_score, 50.0);
        assert_eq!(records[0].message_id, "m1");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn aggregate_below_threshold_is_discarded() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(
            ScriptedHistory::default().with(100, &["m1"]),
            StubMessages::default().with("m1", "about invoices and payments"),
        )
        .await;
        // Two Low rules match → 40.0 < 50.0.
        h.add_rule("invoices", "invoices", RulePriority::Low).await;
        h.add_rule("payments", "payments", RulePriority::Low).await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        let outcome = h.orchestrator.handle_notification(USER, 110).await.unwrap();
        assert!(matches!(
            outcome,
            NotificationOutcome::Processed { scored: 1, stored: 0, .. }
        ));
        assert_eq!(h.stored_count().await, 0);
        // Discarding is not an error: the cursor still advances.
        assert_eq!(h.cursor().await, Some(110));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn no_rules_means_nothing_stored_but_cursor_advances() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(
            ScriptedHistory::default().with(100, &["m1"]),
            StubMessages::default().with("m1", "anything at all"),
        )
        .await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        let outcome = h.orchestrator.handle_notification(USER, 110).await.unwrap();
        assert!(matches!(
            outcome,
            NotificationOutcome::Processed { scored: 1, stored: 0, .. }
        ));
        assert_eq!(h.cursor().await, Some(110));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn batch_is_processed_oldest_first() {
    timeout(TEST_TIMEOUT, async {
        let messages = StubMessages::default()
            .with("m1", "first")
            .with("m2", "second")
            .with("m3", "third");
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.insert_user(USER, None, None).await.unwrap();
        let messages = Arc::new(messages);
        let orchestrator = IngestionOrchestrator::new(
            Arc::clone(&db),
            Arc::new(KeywordClassifier),
            Arc::new(ScriptedHistory::default().with(100, &["m1", "m2", "m3"])),
            Arc::clone(&messages) as Arc<dyn MessageFetcher>,
            IngestConfig::default(),
        );

        orchestrator.handle_notification(USER, 100).await.unwrap();
        orchestrator.handle_notification(USER, 110).await.unwrap();

        let log = messages.fetch_log.lock().await;
        assert_eq!(*log, vec!["m1".to_string(), "m2".to_string(), "m3".to_string()]);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn failed_message_fetch_skips_only_that_message() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(
            ScriptedHistory::default().with(100, &["m1", "broken", "m3"]),
            StubMessages::default()
                .with("m1", "about invoices")
                .with("m3", "about invoices")
                .failing("broken"),
        )
        .await;
        h.add_rule("invoices", "invoices", RulePriority::High).await;
        h.add_rule("billing", "billing", RulePriority::Low).await;
        h.add_rule("urgent", "invoices", RulePriority::Low).await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        let outcome = h.orchestrator.handle_notification(USER, 110).await.unwrap();

        // 30 + 20 = 50 for m1/m3; "broken" is skipped, the rest of the
        // batch survives and the cursor advances.
        match outcome {
            NotificationOutcome::Processed {
                fetched,
                scored,
                stored,
                advanced_to,
            } => {
                assert_eq!(fetched, 3);
                assert_eq!(scored, 2);
                assert_eq!(stored, 2);
                assert_eq!(advanced_to, 110);
            }
            other => panic!("Expected Processed, got {other:?}"),
        }
        assert_eq!(h.cursor().await, Some(110));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn reprocessing_a_batch_is_idempotent() {
    timeout(TEST_TIMEOUT, async {
        // Simulates redelivery after a crash between store and cursor
        // advance: the same ids come back and are upserted, not duplicated.
        let h = harness(
            ScriptedHistory::default().with(100, &["m1"]).with(110, &["m1"]),
            StubMessages::default().with("m1", "about invoices"),
        )
        .await;
        h.add_rule("invoices", "invoices", RulePriority::High).await;
        h.add_rule("extra", "invoices", RulePriority::Low).await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        h.orchestrator.handle_notification(USER, 110).await.unwrap();
        assert_eq!(h.stored_count().await, 1);

        // The provider re-announces m1 in the next delta.
        h.orchestrator.handle_notification(USER, 120).await.unwrap();
        assert_eq!(h.stored_count().await, 1);
        assert_eq!(h.cursor().await, Some(120));
    })
    .await
    .unwrap();
}

// ── Webhook boundary ────────────────────────────────────────────────

async fn start_server(h: &Harness) -> u16 {
    let state = AppState {
        orchestrator: Arc::clone(&h.orchestrator),
        db: Arc::clone(&h.db),
        rules: h.rules.clone(),
    };
    let app = api_routes(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

fn envelope(inner_json: &str) -> serde_json::Value {
    serde_json::json!({
        "message": {
            "data": BASE64.encode(inner_json),
            "messageId": "pubsub-1",
            "publishTime": "2026-01-01T00:00:00Z"
        },
        "subscription": "projects/test/subscriptions/mail"
    })
}

#[tokio::test]
async fn webhook_acks_valid_notification_and_processes_it() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(ScriptedHistory::default(), StubMessages::default()).await;
        let port = start_server(&h).await;

        let body = envelope(&format!(
            r#"{{"emailAddress": "{USER}", "historyId": "100"}}"#
        ));
        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/v1/gmail-webhook"))
            .json(&body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(h.cursor().await, Some(100));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn webhook_acks_undecodable_payload_without_side_effects() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(ScriptedHistory::default(), StubMessages::default()).await;
        let port = start_server(&h).await;

        // Envelope parses, inner data is garbage.
        let body = serde_json::json!({
            "message": {"data": "!!! not base64 !!!", "messageId": "pubsub-2"},
            "subscription": "projects/test/subscriptions/mail"
        });
        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/v1/gmail-webhook"))
            .json(&body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(h.cursor().await, None);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn webhook_acks_unknown_user() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(ScriptedHistory::default(), StubMessages::default()).await;
        let port = start_server(&h).await;

        let body = envelope(r#"{"emailAddress": "ghost@example.com", "historyId": "7"}"#);
        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/v1/gmail-webhook"))
            .json(&body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn processed_emails_endpoint_returns_most_recent_first() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(
            ScriptedHistory::default()
                .with(100, &["m1"])
                .with(110, &["m2"]),
            StubMessages::default()
                .with("m1", "about invoices")
                .with("m2", "about invoices"),
        )
        .await;
        h.add_rule("invoices", "invoices", RulePriority::High).await;
        h.add_rule("more", "invoices", RulePriority::Low).await;

        h.orchestrator.handle_notification(USER, 100).await.unwrap();
        h.orchestrator.handle_notification(USER, 110).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.orchestrator.handle_notification(USER, 120).await.unwrap();

        let port = start_server(&h).await;
        let response = reqwest::Client::new()
            .get(format!(
                "http://127.0.0.1:{port}/api/v1/processed-emails?owner={USER}&limit=10"
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let records: Vec<serde_json::Value> = response.json().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["message_id"], "m2");
        assert_eq!(records[1]["message_id"], "m1");
        assert!(records[0]["scores"].is_array());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn rules_crud_round_trip_over_http() {
    timeout(TEST_TIMEOUT, async {
        let h = harness(ScriptedHistory::default(), StubMessages::default()).await;
        let port = start_server(&h).await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/api/v1/rules");

        // Missing owner header is rejected.
        let response = client.get(&base).send().await.unwrap();
        assert_eq!(response.status(), 400);

        // Create.
        let response = client
            .post(&base)
            .header("x-owner-id", USER)
            .json(&serde_json::json!({
                "name": "invoices",
                "description": "emails about invoices",
                "priority": "high"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        let created: serde_json::Value = response.json().await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        // Read back as a forest.
        let response = client
            .get(&base)
            .header("x-owner-id", USER)
            .send()
            .await
            .unwrap();
        let forest: Vec<serde_json::Value> = response.json().await.unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0]["priority"], "high");

        // Update.
        let response = client
            .put(format!("{base}/{id}"))
            .header("x-owner-id", USER)
            .json(&serde_json::json!({"priority": "low"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let updated: serde_json::Value = response.json().await.unwrap();
        assert_eq!(updated["priority"], "low");

        // Other owners cannot see it.
        let response = client
            .get(format!("{base}/{id}"))
            .header("x-owner-id", "bob@example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // Delete.
        let response = client
            .delete(format!("{base}/{id}"))
            .header("x-owner-id", USER)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = client
            .get(format!("{base}/{id}"))
            .header("x-owner-id", USER)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    })
    .await
    .unwrap();
}
