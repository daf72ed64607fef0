//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Ingestion behavior knobs.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Attempts for the cursor-advance write before giving up.
    pub cursor_write_attempts: u32,
    /// Base delay for cursor-write retry backoff (doubles per attempt).
    pub cursor_retry_base: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            cursor_write_attempts: 3,
            cursor_retry_base: Duration::from_millis(200),
        }
    }
}

/// Zero-shot classifier endpoint configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Full inference URL, model included.
    pub endpoint: String,
    /// Bearer token for the inference API.
    pub api_token: SecretString,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ClassifierConfig {
    /// Read from `HF_API_TOKEN` / `MAILSIFT_CLASSIFIER_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_token = std::env::var("HF_API_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("HF_API_TOKEN".into()))?;
        let endpoint = std::env::var("MAILSIFT_CLASSIFIER_URL").unwrap_or_else(|_| {
            "https://api-inference.huggingface.co/models/facebook/bart-large-mnli".to_string()
        });
        Ok(Self {
            endpoint,
            api_token: SecretString::from(api_token),
            request_timeout: Duration::from_secs(30),
        })
    }
}

/// Mail provider REST API configuration.
#[derive(Debug, Clone)]
pub struct MailApiConfig {
    /// API base, e.g. `https://gmail.googleapis.com/gmail/v1`.
    pub base_url: String,
    /// Per-request timeout for history/message/watch calls.
    pub request_timeout: Duration,
    /// Pub/Sub topic new-mail notifications are published to.
    pub watch_topic: Option<String>,
    /// Interval between mailbox watch renewals.
    pub watch_renew_interval: Duration,
}

impl Default for MailApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
            request_timeout: Duration::from_secs(30),
            watch_topic: None,
            watch_renew_interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl MailApiConfig {
    /// Read overrides from `GMAIL_API_BASE` / `GMAIL_WATCH_TOPIC` /
    /// `GMAIL_WATCH_RENEW_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(base) = std::env::var("GMAIL_API_BASE") {
            config.base_url = base.trim_end_matches('/').to_string();
        }
        config.watch_topic = std::env::var("GMAIL_WATCH_TOPIC").ok();
        if let Ok(secs) = std::env::var("GMAIL_WATCH_RENEW_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "GMAIL_WATCH_RENEW_SECS".into(),
                message: format!("not an integer: {secs}"),
            })?;
            config.watch_renew_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}
