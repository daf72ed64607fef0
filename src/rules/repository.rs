//! Rule repository — owner-scoped CRUD plus forest materialization.
//!
//! The only way the scoring path sees rules is as an immutable forest
//! snapshot loaded here; nothing downstream holds references back into
//! storage.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::rules::model::{Rule, RulePriority, RuleRow, build_forest};
use crate::store::Database;

/// Fields for creating a rule.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub name: String,
    pub description: String,
    pub priority: RulePriority,
    pub parent_id: Option<String>,
    pub position: i64,
}

/// Partial update for a rule. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<RulePriority>,
    pub position: Option<i64>,
}

/// Owner-scoped rule access over the `Database` trait.
#[derive(Clone)]
pub struct RuleRepository {
    db: Arc<dyn Database>,
}

impl RuleRepository {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Load an owner's full rule forest.
    ///
    /// An owner with no rules gets `Ok(vec![])` — only storage
    /// unavailability is an error.
    pub async fn load_forest(&self, owner_id: &str) -> Result<Vec<Rule>, DatabaseError> {
        let rows = self.db.list_rule_rows(owner_id).await?;
        Ok(build_forest(rows))
    }

    /// Create a rule. A `parent_id` pointing at a rule the owner does
    /// not have is rejected as not-found.
    pub async fn create_rule(
        &self,
        owner_id: &str,
        new: NewRule,
    ) -> Result<RuleRow, DatabaseError> {
        if let Some(ref parent_id) = new.parent_id {
            if self.db.get_rule_row(owner_id, parent_id).await?.is_none() {
                return Err(DatabaseError::NotFound {
                    entity: "rule".into(),
                    id: parent_id.clone(),
                });
            }
        }

        let now = Utc::now();
        let row = RuleRow {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            parent_id: new.parent_id,
            name: new.name,
            description: new.description,
            priority: new.priority,
            position: new.position,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_rule_row(&row).await?;
        Ok(row)
    }

    /// Get one of an owner's rules by id.
    pub async fn get_rule(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<RuleRow>, DatabaseError> {
        self.db.get_rule_row(owner_id, id).await
    }

    /// Apply a partial update, returning the updated row.
    pub async fn update_rule(
        &self,
        owner_id: &str,
        id: &str,
        patch: RulePatch,
    ) -> Result<Option<RuleRow>, DatabaseError> {
        let Some(mut row) = self.db.get_rule_row(owner_id, id).await? else {
            return Ok(None);
        };

        if let Some(name) = patch.name {
            row.name = name;
        }
        if let Some(description) = patch.description {
            row.description = description;
        }
        if let Some(priority) = patch.priority {
            row.priority = priority;
        }
        if let Some(position) = patch.position {
            row.position = position;
        }
        row.updated_at = Utc::now();

        self.db.update_rule_row(&row).await?;
        Ok(Some(row))
    }

    /// Delete a rule and all its descendants. Returns the number of rows
    /// removed (0 if the rule did not exist).
    pub async fn delete_rule(&self, owner_id: &str, id: &str) -> Result<usize, DatabaseError> {
        let rows = self.db.list_rule_rows(owner_id).await?;
        let mut to_delete = vec![id.to_string()];
        let mut frontier = vec![id.to_string()];

        // Walk the stored parent links breadth-first to collect the subtree.
        while let Some(current) = frontier.pop() {
            for row in &rows {
                if row.parent_id.as_deref() == Some(current.as_str()) {
                    to_delete.push(row.id.clone());
                    frontier.push(row.id.clone());
                }
            }
        }

        let mut deleted = 0;
        for rule_id in to_delete {
            if self.db.delete_rule_row(owner_id, &rule_id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::LibSqlBackend;

    async fn repo() -> RuleRepository {
        let db = LibSqlBackend::new_memory().await.unwrap();
        RuleRepository::new(Arc::new(db))
    }

    fn new_rule(name: &str, parent_id: Option<String>) -> NewRule {
        NewRule {
            name: name.into(),
            description: format!("emails about {name}"),
            priority: RulePriority::Medium,
            parent_id,
            position: 0,
        }
    }

    #[tokio::test]
    async fn empty_owner_loads_empty_forest() {
        let repo = repo().await;
        let forest = repo.load_forest("nobody").await.unwrap();
        assert!(forest.is_empty());
    }

    #[tokio::test]
    async fn create_and_load_nested_forest() {
        let repo = repo().await;
        let root = repo.create_rule("owner", new_rule("work", None)).await.unwrap();
        repo.create_rule("owner", new_rule("reports", Some(root.id.clone())))
            .await
            .unwrap();

        let forest = repo.load_forest("owner").await.unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].name, "work");
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(forest[0].children[0].name, "reports");
    }

    #[tokio::test]
    async fn create_with_missing_parent_fails() {
        let repo = repo().await;
        let result = repo
            .create_rule("owner", new_rule("child", Some("no-such-id".into())))
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn parent_must_belong_to_same_owner() {
        let repo = repo().await;
        let other = repo.create_rule("alice", new_rule("root", None)).await.unwrap();
        let result = repo
            .create_rule("bob", new_rule("child", Some(other.id)))
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn patch_updates_only_given_fields() {
        let repo = repo().await;
        let row = repo.create_rule("owner", new_rule("draft", None)).await.unwrap();

        let updated = repo
            .update_rule(
                "owner",
                &row.id,
                RulePatch {
                    priority: Some(RulePriority::High),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.priority, RulePriority::High);
        assert_eq!(updated.name, "draft");
    }

    #[tokio::test]
    async fn update_missing_rule_is_none() {
        let repo = repo().await;
        let result = repo
            .update_rule("owner", "no-such-id", RulePatch::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_descendants() {
        let repo = repo().await;
        let root = repo.create_rule("owner", new_rule("root", None)).await.unwrap();
        let child = repo
            .create_rule("owner", new_rule("child", Some(root.id.clone())))
            .await
            .unwrap();
        repo.create_rule("owner", new_rule("grandchild", Some(child.id.clone())))
            .await
            .unwrap();
        repo.create_rule("owner", new_rule("unrelated", None)).await.unwrap();

        let deleted = repo.delete_rule("owner", &root.id).await.unwrap();
        assert_eq!(deleted, 3);

        let forest = repo.load_forest("owner").await.unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].name, "unrelated");
    }

    #[tokio::test]
    async fn delete_missing_rule_is_zero() {
        let repo = repo().await;
        assert_eq!(repo.delete_rule("owner", "ghost").await.unwrap(), 0);
    }
}
