// src/queue/work_item.rs
//! Generated units of work
//!
//! A post item carries a url and a title; a comment item carries the target
//! it comments on and its text in `title`. The hash identifies the item for
//! at-most-once delivery per topic.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lane holding comment work for a topic
pub fn comment_lane(topic: &str) -> String {
    format!("{}.comments", topic)
}

/// One queued unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Content url (empty for comments)
    #[serde(default)]
    pub url: String,

    /// Post title or comment text
    pub title: String,

    /// Where the item should be produced, when not its own topic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,

    /// Item being commented on; present only for comment work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Agent the item is meant for; it lands in that agent's batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Identity hash; filled by [`WorkItem::normalized`] when missing
    #[serde(default)]
    pub hash: String,
}

impl WorkItem {
    /// Post work item
    pub fn post(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            route: None,
            target: None,
            agent: None,
            hash: String::new(),
        }
        .normalized()
    }

    /// Comment work item
    pub fn comment(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: String::new(),
            title: text.into(),
            route: None,
            target: Some(target.into()),
            agent: None,
            hash: String::new(),
        }
        .normalized()
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn for_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn is_comment(&self) -> bool {
        self.target.is_some()
    }

    /// SHA-256 of the normalized url, or of target and text for comments
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        match &self.target {
            Some(target) => {
                hasher.update(target.as_bytes());
                hasher.update(b"\n");
                hasher.update(normalize_text(&self.title).as_bytes());
            }
            None => hasher.update(normalize_url(&self.url).as_bytes()),
        }
        format!("{:x}", hasher.finalize())
    }

    /// Fill in the hash if the producer left it empty
    pub fn normalized(mut self) -> Self {
        if self.hash.is_empty() {
            self.hash = self.compute_hash();
        }
        self
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
