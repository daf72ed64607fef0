//! Rule data model — flat stored rows assembled into per-owner trees.
//!
//! Rules are persisted as flat rows with a `parent_id` back-reference and
//! materialized into owned `Rule` trees at load time. The in-memory tree
//! holds its children by value, so a rule can never reach itself through
//! a child edge. Rows whose parent chain does not terminate at a root are
//! dropped during assembly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Rule priority tier.
///
/// Closed set — the scoring table matches exhaustively on it, so adding a
/// tier forces a compile-time update of the point values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulePriority {
    Low,
    Medium,
    High,
}

impl RulePriority {
    /// DB string for this priority.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse a DB string. Unknown values fall back to `Low`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

impl Default for RulePriority {
    fn default() -> Self {
        Self::Low
    }
}

/// A rule row as stored — flat, with a parent reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRow {
    pub id: String,
    pub owner_id: String,
    /// `None` marks a top-level (root) rule.
    pub parent_id: Option<String>,
    pub name: String,
    /// Natural-language label handed to the classifier verbatim.
    pub description: String,
    pub priority: RulePriority,
    /// Sibling ordering within a parent.
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A materialized rule node. Owns its children — no back-edges.
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub priority: RulePriority,
    pub children: Vec<Rule>,
}

impl Rule {
    /// Number of nodes in this subtree, self included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Rule::node_count).sum::<usize>()
    }
}

/// Assemble an owner's flat rows into a forest of rule trees.
///
/// Children are grouped under their parent and ordered by `position`
/// (ties broken by creation time). Rows referencing a missing parent are
/// unreachable from any root and are dropped with a warning.
pub fn build_forest(mut rows: Vec<RuleRow>) -> Vec<Rule> {
    let total = rows.len();

    rows.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    let mut by_parent: HashMap<Option<String>, Vec<RuleRow>> = HashMap::new();
    for row in rows {
        by_parent.entry(row.parent_id.clone()).or_default().push(row);
    }

    let roots = by_parent.remove(&None).unwrap_or_default();
    let forest: Vec<Rule> = roots
        .into_iter()
        .map(|row| attach_children(row, &mut by_parent))
        .collect();

    let built: usize = forest.iter().map(Rule::node_count).sum();
    if built < total {
        warn!(
            dropped = total - built,
            "Dropped rule rows unreachable from any root"
        );
    }

    forest
}

fn attach_children(row: RuleRow, by_parent: &mut HashMap<Option<String>, Vec<RuleRow>>) -> Rule {
    let child_rows = by_parent.remove(&Some(row.id.clone())).unwrap_or_default();
    let children = child_rows
        .into_iter()
        .map(|child| attach_children(child, by_parent))
        .collect();

    Rule {
        id: row.id,
        name: row.name,
        description: row.description,
        priority: row.priority,
        children,
    }
}
