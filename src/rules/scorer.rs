//! Rule scorer — recursive, priority-weighted evaluation of a rule forest.
//!
//! Each node is classified independently against its own description. A
//! node whose classifier score clears the match threshold contributes a
//! fixed point value driven by priority alone; contributions sum
//! additively down the tree with no depth discount, and the grand total
//! across all roots is clamped to 100 at the top. Classifier failures are
//! absorbed: the failing node contributes zero and its children are still
//! evaluated.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::classifier::Classifier;
use crate::rules::model::{Rule, RulePriority};

/// Classifier score at or above which a single rule node counts as matched.
pub const MATCH_THRESHOLD: f64 = 0.5;

/// Upper bound for the aggregate score. Applied once, across all roots.
pub const MAX_AGGREGATE: f64 = 100.0;

/// Points a matched node contributes, by priority.
pub fn priority_points(priority: RulePriority) -> f64 {
    match priority {
        RulePriority::High => 30.0,
        RulePriority::Low | RulePriority::Medium => 20.0,
    }
}

/// Per-node scoring detail, persisted alongside the aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct RuleScore {
    pub rule_id: String,
    pub rule_name: String,
    /// Raw classifier score for this node (0.0 when the call failed).
    pub score: f64,
    pub matched: bool,
    pub points: f64,
}

/// Result of evaluating one piece of content against a rule forest.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    /// Aggregate score in `[0, 100]`.
    pub aggregate: f64,
    pub breakdown: Vec<RuleScore>,
}

impl ScoreReport {
    /// Report for content evaluated against an empty forest.
    pub fn empty() -> Self {
        Self {
            aggregate: 0.0,
            breakdown: Vec::new(),
        }
    }

    /// Whether any node in the breakdown matched.
    pub fn any_matched(&self) -> bool {
        self.breakdown.iter().any(|s| s.matched)
    }
}

/// Evaluates rule forests against message content via the classifier.
pub struct RuleScorer {
    classifier: Arc<dyn Classifier>,
}

impl RuleScorer {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    /// Evaluate `content` against a rule forest.
    ///
    /// Deterministic for fixed classifier outputs: summation is
    /// commutative across siblings and the only bound enforcement is the
    /// final clamp.
    pub async fn evaluate(&self, content: &str, roots: &[Rule]) -> ScoreReport {
        let mut breakdown = Vec::new();
        let mut total = 0.0;
        for root in roots {
            total += self.eval_branch(content, root, &mut breakdown).await;
        }

        let aggregate = total.min(MAX_AGGREGATE);
        debug!(
            raw_total = total,
            aggregate,
            nodes = breakdown.len(),
            "Rule forest evaluated"
        );

        ScoreReport { aggregate, breakdown }
    }

    /// Branch score: this node's contribution plus all descendants'.
    fn eval_branch<'a>(
        &'a self,
        content: &'a str,
        rule: &'a Rule,
        breakdown: &'a mut Vec<RuleScore>,
    ) -> Pin<Box<dyn Future<Output = f64> + Send + 'a>> {
        Box::pin(async move {
            let score = self.classify_node(content, rule).await;
            let matched = score >= MATCH_THRESHOLD;
            let points = if matched {
                priority_points(rule.priority)
            } else {
                0.0
            };

            breakdown.push(RuleScore {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                score,
                matched,
                points,
            });

            let mut branch = points;
            for child in &rule.children {
                branch += self.eval_branch(content, child, breakdown).await;
            }
            branch
        })
    }

    /// Raw classifier score for one node. Failures and empty results
    /// collapse to 0.0.
    async fn classify_node(&self, content: &str, rule: &Rule) -> f64 {
        let labels = [rule.description.clone()];
        match self.classifier.classify(content, &labels).await {
            Ok(scores) => scores.first().map(|s| s.score).unwrap_or(0.0),
            Err(e) => {
                debug!(
                    rule_id = %rule.id,
                    error = %e,
                    "Classifier call failed, node contributes 0"
                );
                0.0
            }
        }
    }
}
