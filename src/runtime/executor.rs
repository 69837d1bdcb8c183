// src/runtime/executor.rs
//! Action executor seam
//!
//! The engine decides what to do and when; an [`ActionExecutor`] does it on
//! the target platform. The executor reports success with a JSON response
//! or fails with `ExecutionFailed`, which the worker logs without
//! registering the action.

use crate::queue::work_item::WorkItem;
use crate::scheduling::budget::ActionCategory;
use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// A concrete action the worker wants performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Read an item of the topic listing
    Consume { topic: String, item: String },

    /// Vote an item up (`1`) or down (`-1`)
    Vote { topic: String, item: String, direction: i8 },

    /// Comment on `work.target`
    Comment { topic: String, work: WorkItem },

    /// Publish `work` into `route`
    Produce { route: String, work: WorkItem },
}

impl PlannedAction {
    pub fn category(&self) -> ActionCategory {
        match self {
            PlannedAction::Consume { .. } => ActionCategory::Consume,
            PlannedAction::Vote { .. } => ActionCategory::Vote,
            PlannedAction::Comment { .. } => ActionCategory::Comment,
            PlannedAction::Produce { .. } => ActionCategory::Produce,
        }
    }

    /// Identity used to avoid acting twice on the same thing
    pub fn subject(&self) -> &str {
        match self {
            PlannedAction::Consume { item, .. } | PlannedAction::Vote { item, .. } => item,
            PlannedAction::Comment { work, .. } | PlannedAction::Produce { work, .. } => &work.hash,
        }
    }
}

/// Performs actions on the platform
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Item identifiers currently visible in a topic, in display order
    async fn listing(&self, topic: &str) -> Result<Vec<String>>;

    /// Perform one action for `agent`
    async fn perform(&self, agent: &str, action: &PlannedAction) -> Result<serde_json::Value>;
}

/// Executor that only logs; every action succeeds
#[derive(Debug, Clone)]
pub struct DryRunExecutor {
    listing_size: usize,
}

impl DryRunExecutor {
    /// Listings contain `listing_size` synthetic items `<topic>-<n>`
    pub fn new(listing_size: usize) -> Self {
        Self { listing_size }
    }
}

impl Default for DryRunExecutor {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn listing(&self, topic: &str) -> Result<Vec<String>> {
        Ok((0..self.listing_size)
            .map(|n| format!("{}-{}", topic, n))
            .collect())
    }

    async fn perform(&self, agent: &str, action: &PlannedAction) -> Result<serde_json::Value> {
        info!("[dry run] {} {:?}", agent, action);
        Ok(json!({ "dry_run": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_and_subject() {
        let work = WorkItem::post("https://a.example", "A");
        let produce = PlannedAction::Produce {
            route: "rust".into(),
            work: work.clone(),
        };
        assert_eq!(produce.category(), ActionCategory::Produce);
        assert_eq!(produce.subject(), work.hash);

        let vote = PlannedAction::Vote {
            topic: "rust".into(),
            item: "rust-3".into(),
            direction: -1,
        };
        assert_eq!(vote.category(), ActionCategory::Vote);
        assert_eq!(vote.subject(), "rust-3");
    }

    #[test]
    fn test_serialized_shape() {
        let consume = PlannedAction::Consume {
            topic: "rust".into(),
            item: "rust-1".into(),
        };
        let value = serde_json::to_value(&consume).unwrap();
        assert_eq!(value["action"], "consume");
        assert_eq!(value["item"], "rust-1");
    }

    #[tokio::test]
    async fn test_dry_run() {
        let executor = DryRunExecutor::new(3);
        assert_eq!(
            executor.listing("go").await.unwrap(),
            vec!["go-0", "go-1", "go-2"]
        );
        let response = executor
            .perform(
                "alice",
                &PlannedAction::Consume {
                    topic: "go".into(),
                    item: "go-0".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(response["dry_run"], true);
    }
}
