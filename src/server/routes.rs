//! HTTP surface: the push-notification webhook, the processed-emails
//! query, and the rule CRUD endpoints.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::error::DatabaseError;
use crate::ingest::IngestionOrchestrator;
use crate::rules::{NewRule, RulePatch, RulePriority, RuleRepository, RuleRow};
use crate::server::payload::{PushEnvelope, decode_notification};
use crate::store::{Database, ScoredMessageRecord};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub db: Arc<dyn Database>,
    pub rules: RuleRepository,
}

/// Build the service router.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/gmail-webhook", post(gmail_webhook))
        .route("/api/v1/processed-emails", get(processed_emails))
        .route("/api/v1/rules", get(list_rules).post(create_rule))
        .route(
            "/api/v1/rules/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Webhook ─────────────────────────────────────────────────────────

/// POST /api/v1/gmail-webhook
///
/// Receives push notifications from the Pub/Sub transport. Always
/// returns 200 once the envelope itself parses — redelivering a poisoned
/// payload forever helps nobody. The internal outcome or failure is
/// logged here, not surfaced to the sender.
async fn gmail_webhook(
    State(state): State<AppState>,
    Json(envelope): Json<PushEnvelope>,
) -> StatusCode {
    let notification = match decode_notification(&envelope.message.data) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(
                pubsub_message_id = %envelope.message.message_id,
                error = %e,
                "Invalid notification payload, acking without processing"
            );
            return StatusCode::OK;
        }
    };

    match state
        .orchestrator
        .handle_notification(&notification.email_address, notification.history_id)
        .await
    {
        Ok(outcome) => info!(
            email = %notification.email_address,
            history_id = notification.history_id,
            outcome = outcome.label(),
            "Notification handled"
        ),
        Err(e) => error!(
            email = %notification.email_address,
            history_id = notification.history_id,
            error = %e,
            "Notification processing failed, acking anyway"
        ),
    }

    StatusCode::OK
}

// ── Processed emails ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProcessedEmailsQuery {
    owner: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ProcessedEmail {
    owner_id: String,
    message_id: String,
    sender: String,
    subject: String,
    snippet: String,
    aggregate_score: f64,
    scores: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<ScoredMessageRecord> for ProcessedEmail {
    fn from(record: ScoredMessageRecord) -> Self {
        let scores = serde_json::from_str(&record.breakdown)
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        Self {
            owner_id: record.owner_id,
            message_id: record.message_id,
            sender: record.sender,
            subject: record.subject,
            snippet: record.snippet,
            aggregate_score: record.aggregate_score,
            scores,
            created_at: record.created_at,
        }
    }
}

/// GET /api/v1/processed-emails?owner=&limit=
///
/// Latest stored messages, most recent first.
async fn processed_emails(
    State(state): State<AppState>,
    Query(query): Query<ProcessedEmailsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).min(500);
    match state
        .db
        .recent_scored_messages(query.owner.as_deref(), limit)
        .await
    {
        Ok(records) => {
            let body: Vec<ProcessedEmail> = records.into_iter().map(Into::into).collect();
            Json(body).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to list processed emails");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
                .into_response()
        }
    }
}

// ── Rules CRUD ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateRuleRequest {
    name: String,
    description: String,
    #[serde(default)]
    priority: RulePriority,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    position: i64,
}

#[derive(Debug, Deserialize)]
struct UpdateRuleRequest {
    name: Option<String>,
    description: Option<String>,
    priority: Option<RulePriority>,
    position: Option<i64>,
}

#[derive(Debug, Serialize)]
struct RuleResponse {
    id: String,
    name: String,
    description: String,
    priority: RulePriority,
    parent_id: Option<String>,
    position: i64,
}

impl From<RuleRow> for RuleResponse {
    fn from(row: RuleRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            priority: row.priority,
            parent_id: row.parent_id,
            position: row.position,
        }
    }
}

/// Owner identity comes from a header until real auth fronts this API.
fn owner_id(headers: &HeaderMap) -> Result<String, (StatusCode, Json<serde_json::Value>)> {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "missing X-Owner-Id header"})),
        ))
}

/// GET /api/v1/rules — the owner's materialized rule forest.
async fn list_rules(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(reject) => return reject.into_response(),
    };
    match state.rules.load_forest(&owner).await {
        Ok(forest) => Json(forest).into_response(),
        Err(e) => {
            error!(owner = %owner, error = %e, "Failed to load rule forest");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
                .into_response()
        }
    }
}

/// POST /api/v1/rules
async fn create_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRuleRequest>,
) -> impl IntoResponse {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(reject) => return reject.into_response(),
    };
    let new = NewRule {
        name: request.name,
        description: request.description,
        priority: request.priority,
        parent_id: request.parent_id,
        position: request.position,
    };
    match state.rules.create_rule(&owner, new).await {
        Ok(row) => (StatusCode::CREATED, Json(RuleResponse::from(row))).into_response(),
        Err(DatabaseError::NotFound { id, .. }) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("parent rule {id} not found")})),
        )
            .into_response(),
        Err(e) => {
            error!(owner = %owner, error = %e, "Failed to create rule");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
                .into_response()
        }
    }
}

/// GET /api/v1/rules/{id}
async fn get_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(reject) => return reject.into_response(),
    };
    match state.rules.get_rule(&owner, &id).await {
        Ok(Some(row)) => Json(RuleResponse::from(row)).into_response(),
        Ok(None) => rule_not_found(),
        Err(e) => {
            error!(owner = %owner, rule = %id, error = %e, "Failed to get rule");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
                .into_response()
        }
    }
}

/// PUT /api/v1/rules/{id}
async fn update_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateRuleRequest>,
) -> impl IntoResponse {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(reject) => return reject.into_response(),
    };
    let patch = RulePatch {
        name: request.name,
        description: request.description,
        priority: request.priority,
        position: request.position,
    };
    match state.rules.update_rule(&owner, &id, patch).await {
        Ok(Some(row)) => Json(RuleResponse::from(row)).into_response(),
        Ok(None) => rule_not_found(),
        Err(e) => {
            error!(owner = %owner, rule = %id, error = %e, "Failed to update rule");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
                .into_response()
        }
    }
}

/// DELETE /api/v1/rules/{id} — removes the rule and its subtree.
async fn delete_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(reject) => return reject.into_response(),
    };
    match state.rules.delete_rule(&owner, &id).await {
        Ok(0) => rule_not_found(),
        Ok(deleted) => Json(serde_json::json!({"deleted": deleted})).into_response(),
        Err(e) => {
            error!(owner = %owner, rule = %id, error = %e, "Failed to delete rule");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
                .into_response()
        }
    }
}

fn rule_not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Rule not found"})),
    )
        .into_response()
}
