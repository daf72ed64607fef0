//! Structured outcome of handling one notification.
//!
//! The transport boundary always acks the delivery; this enum is how the
//! interesting part of "what actually happened" stays visible to the
//! caller's logs instead of being swallowed.

use serde::Serialize;

use crate::store::HistoryId;

/// Terminal state of the notification-handling state machine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// Identity has no account; dropped without side effects.
    UnknownUser,
    /// Stale or duplicate delivery — incoming position ≤ stored cursor.
    Skipped { stored: HistoryId },
    /// First notification ever for this user; incoming position stored
    /// as the baseline, nothing fetched.
    Baseline { stored: HistoryId },
    /// History resolved to zero added messages; cursor advanced.
    EmptyDelta { advanced_to: HistoryId },
    /// Batch fully processed and cursor advanced.
    Processed {
        advanced_to: HistoryId,
        fetched: usize,
        scored: usize,
        stored: usize,
    },
}

impl NotificationOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownUser => "unknown_user",
            Self::Skipped { .. } => "skipped",
            Self::Baseline { .. } => "baseline",
            Self::EmptyDelta { .. } => "empty_delta",
            Self::Processed { .. } => "processed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(NotificationOutcome::UnknownUser.label(), "unknown_user");
        assert_eq!(NotificationOutcome::Skipped { stored: 5 }.label(), "skipped");
        assert_eq!(NotificationOutcome::Baseline { stored: 5 }.label(), "baseline");
        assert_eq!(
            NotificationOutcome::EmptyDelta { advanced_to: 9 }.label(),
            "empty_delta"
        );
        assert_eq!(
            NotificationOutcome::Processed {
                advanced_to: 9,
                fetched: 2,
                scored: 2,
                stored: 1
            }
            .label(),
            "processed"
        );
    }

    #[test]
    fn serializes_with_tag() {
        let json = serde_json::to_value(NotificationOutcome::Processed {
            advanced_to: 12,
            fetched: 3,
            scored: 3,
            stored: 1,
        })
        .unwrap();
        assert_eq!(json["outcome"], "processed");
        assert_eq!(json["advanced_to"], 12);
    }
}
