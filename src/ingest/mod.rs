//! Notification ingestion: per-user serialization, the orchestrating
//! state machine, and its structured outcome.

pub mod locks;
pub mod orchestrator;
pub mod outcome;

pub use locks::UserLocks;
pub use orchestrator::{IngestionOrchestrator, STORAGE_THRESHOLD};
pub use outcome::NotificationOutcome;
