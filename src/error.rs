//! Error types for mailsift.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Mail API error: {0}")]
    MailApi(#[from] MailApiError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Classifier invocation errors.
///
/// These never abort scoring — the scorer absorbs them and the affected
/// rule node contributes zero.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Classifier returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Invalid classifier response: {reason}")]
    InvalidResponse { reason: String },
}

/// Errors from the mail provider's REST API (history, messages, watch).
#[derive(Debug, thiserror::Error)]
pub enum MailApiError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Mail API returned status {status} for {endpoint}")]
    BadStatus { endpoint: String, status: u16 },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("No credentials available for {user}: {reason}")]
    Credentials { user: String, reason: String },
}

/// Errors during notification ingestion.
///
/// Per-message fetch failures are absorbed inside the orchestrator and do
/// not surface here; only batch-level failures do. In every error case the
/// user's cursor is left at its previous value.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("History fetch failed: {0}")]
    History(#[source] MailApiError),

    #[error("Cursor write failed after retries: {0}")]
    CursorWrite(#[source] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[source] DatabaseError),
}

/// Webhook payload validation errors.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Payload is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Decoded notification is missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
