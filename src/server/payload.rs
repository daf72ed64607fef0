//! Pub/Sub push envelope decoding and validation.
//!
//! The transport wraps the actual notification in a base64-encoded
//! `message.data` field. Everything here runs before the orchestrator —
//! a payload that fails validation never reaches the state machine.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde::Deserialize;

use crate::error::WebhookError;
use crate::store::HistoryId;

/// Loose mailbox-address shape check — one `@`, no whitespace.
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("static regex"));

/// The `message` field of a push envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded notification JSON.
    pub data: String,
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<String>,
}

/// Full Pub/Sub push notification payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    pub subscription: String,
}

/// Raw decoded notification body.
#[derive(Debug, Deserialize)]
struct RawNotification {
    #[serde(rename = "emailAddress")]
    email_address: Option<String>,
    #[serde(rename = "historyId")]
    history_id: Option<serde_json::Value>,
}

/// A validated new-mail notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailNotification {
    pub email_address: String,
    pub history_id: HistoryId,
}

/// Decode and validate the base64 `message.data` field.
pub fn decode_notification(data: &str) -> Result<MailNotification, WebhookError> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| WebhookError::InvalidBase64(e.to_string()))?;
    let text =
        String::from_utf8(bytes).map_err(|e| WebhookError::InvalidJson(e.to_string()))?;
    let raw: RawNotification =
        serde_json::from_str(&text).map_err(|e| WebhookError::InvalidJson(e.to_string()))?;

    let email_address = raw
        .email_address
        .ok_or(WebhookError::MissingField("emailAddress"))?;
    if !ADDRESS_RE.is_match(&email_address) {
        return Err(WebhookError::InvalidField {
            field: "emailAddress",
            value: email_address,
        });
    }

    // The provider encodes the history id as a decimal string; tolerate a
    // bare number too.
    let history_value = raw.history_id.ok_or(WebhookError::MissingField("historyId"))?;
    let history_id = match &history_value {
        serde_json::Value::String(s) => s.parse::<HistoryId>().ok(),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    }
    .ok_or_else(|| WebhookError::InvalidField {
        field: "historyId",
        value: history_value.to_string(),
    })?;

    Ok(MailNotification {
        email_address,
        history_id,
    })
}
