//! HTTP transport boundary.

pub mod payload;
pub mod routes;

pub use payload::{MailNotification, PushEnvelope, decode_notification};
pub use routes::{AppState, api_routes};
