//! Message fetcher — turns a message id into sender/subject/snippet.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::MailApiConfig;
use crate::error::MailApiError;
use crate::mail::TokenSource;
use crate::store::UserAccount;

/// The slice of a message the scoring pipeline needs.
#[derive(Debug, Clone)]
pub struct MessageDetails {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
}

impl MessageDetails {
    /// The text handed to the classifier.
    pub fn classifiable_content(&self) -> String {
        format!("Subject: {}\n\n{}", self.subject, self.snippet)
    }
}

/// Fetches message content from the provider.
#[async_trait]
pub trait MessageFetcher: Send + Sync {
    async fn fetch_message(
        &self,
        user: &UserAccount,
        message_id: &str,
    ) -> Result<MessageDetails, MailApiError>;
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
    #[serde(default)]
    snippet: String,
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl MessageResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|p| {
            p.headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.as_str())
        })
    }
}

/// Gmail `users.messages.get` client (metadata format).
pub struct GmailMessages {
    config: MailApiConfig,
    tokens: Arc<dyn TokenSource>,
    client: reqwest::Client,
}

impl GmailMessages {
    pub fn new(config: MailApiConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, MailApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MailApiError::RequestFailed {
                endpoint: "messages.get".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            config,
            tokens,
            client,
        })
    }
}

#[async_trait]
impl MessageFetcher for GmailMessages {
    async fn fetch_message(
        &self,
        user: &UserAccount,
        message_id: &str,
    ) -> Result<MessageDetails, MailApiError> {
        let endpoint = format!(
            "{}/users/{}/messages/{}",
            self.config.base_url, user.email, message_id
        );
        let token = self.tokens.access_token(user).await?;

        let response = self
            .client
            .get(&endpoint)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Subject"),
            ])
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
                endpoint,
                status: status.as_u16(),
            });
        }

        let message: MessageResponse =
            response
                .json()
                .await
                .map_err(|e| MailApiError::InvalidResponse {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                })?;

        Ok(MessageDetails {
            sender: message.header("From").unwrap_or("(No Sender)").to_string(),
            subject: message.header("Subject").unwrap_or("(No Subject)").to_string(),
            snippet: message.snippet.clone(),
            id: message.id,
        })
    }
}
