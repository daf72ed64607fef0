//! Text classification port.
//!
//! The core only ever asks one question: "how well does this content
//! match each of these candidate labels?" Everything about the model
//! behind that question lives behind the [`Classifier`] trait.

mod zero_shot;

pub use zero_shot::ZeroShotClassifier;

use async_trait::async_trait;

use crate::error::ClassifierError;

/// A single label's match score.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelScore {
    pub label: String,
    /// Model confidence in `[0, 1]`.
    pub score: f64,
}

/// Classification port — pure I/O, no scoring policy.
///
/// Implementations must return one score per candidate label. Callers
/// treat failures and empty results as "no match" — see the rule scorer.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        content: &str,
        labels: &[String],
    ) -> Result<Vec<LabelScore>, ClassifierError>;
}
