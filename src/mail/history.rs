//! History fetcher — resolves a cursor position into the message ids
//! added since then.
//!
//! The provider numbers mailbox events with a monotonically increasing
//! history id. `GmailHistory` lists events after a starting id, follows
//! pagination to exhaustion, and flattens the "messages added" records
//! into a chronological (oldest-added first) id sequence scoped to the
//! inbox.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::config::MailApiConfig;
use crate::error::MailApiError;
use crate::mail::TokenSource;
use crate::store::{HistoryId, UserAccount};

/// Resolves "what was added since position X" for one mailbox.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Message ids added after `start`, oldest first, deduplicated.
    async fn fetch_added_message_ids(
        &self,
        user: &UserAccount,
        start: HistoryId,
    ) -> Result<Vec<String>, MailApiError>;
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Vec<MessageAdded>,
}

#[derive(Debug, Deserialize)]
struct MessageAdded {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// Gmail `users.history.list` client.
pub struct GmailHistory {
    config: MailApiConfig,
    tokens: Arc<dyn TokenSource>,
    client: reqwest::Client,
}

impl GmailHistory {
    pub fn new(config: MailApiConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, MailApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MailApiError::RequestFailed {
                endpoint: "history.list".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            config,
            tokens,
            client,
        })
    }

    fn endpoint(&self, user: &UserAccount) -> String {
        format!("{}/users/{}/history", self.config.base_url, user.email)
    }
}

#[async_trait]
impl HistoryFetcher for GmailHistory {
    async fn fetch_added_message_ids(
        &self,
        user: &UserAccount,
        start: HistoryId,
    ) -> Result<Vec<String>, MailApiError> {
        let endpoint = self.endpoint(user);
        let token = self.tokens.access_token(user).await?;

        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let start_str = start.to_string();
            let mut query: Vec<(&str, &str)> = vec![
                ("startHistoryId", start_str.as_str()),
                ("historyTypes", "messageAdded"),
                ("labelId", "INBOX"),
            ];
            if let Some(ref token) = page_token {
                query.push(("pageToken", token.as_str()));
            }

            let response = self
                .client
                .get(&endpoint)
                .query(&query)
                .bearer_auth(token.expose_secret())
                .send()
                .await
                .map_err(|e| MailApiError::RequestFailed {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(MailApiError::BadStatus {
                    endpoint: endpoint.clone(),
                    status: status.as_u16(),
                });
            }

            let page: HistoryListResponse =
                response
                    .json()
                    .await
                    .map_err(|e| MailApiError::InvalidResponse {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    })?;

            for record in page.history {
                for added in record.messages_added {
                    // A message can surface in several events (e.g. label
                    // churn); keep its first, oldest occurrence.
                    if !ids.contains(&added.message.id) {
                        ids.push(added.message.id);
                    }
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!(
            user = %user.email,
            start,
            count = ids.len(),
            "History resolved to added message ids"
        );
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_page_parses_and_flattens() {
        let raw = r#"{
            "history": [
                {"id": "101", "messagesAdded": [{"message": {"id": "m1", "threadId": "t1"}}]},
                {"id": "102"},
                {"id": "103", "messagesAdded": [
                    {"message": {"id": "m2"}},
                    {"message": {"id": "m1"}}
                ]}
            ],
            "historyId": "104",
            "nextPageToken": "page-2"
        }"#;
        let page: HistoryListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(page.history.len(), 3);
        assert_eq!(page.next_page_token.as_deref(), Some("page-2"));

        let mut ids: Vec<String> = Vec::new();
        for record in page.history {
            for added in record.messages_added {
                if !ids.contains(&added.message.id) {
                    ids.push(added.message.id);
                }
            }
        }
        // m1's duplicate occurrence is dropped; order stays chronological.
        assert_eq!(ids, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn empty_history_response_parses() {
        let page: HistoryListResponse = serde_json::from_str(r#"{"historyId": "42"}"#).unwrap();
        assert!(page.history.is_empty());
        assert!(page.next_page_token.is_none());
    }
}
