// src/generation/feed.rs
//! JSON-lines feed source
//!
//! Reads `<feed_dir>/<topic>.jsonl` (or the topic's configured feed), one
//! [`WorkItem`] per line. Keywords, when configured, keep only items whose
//! title mentions one of them. Malformed lines are skipped; a read error
//! ends the feed.

use crate::generation::source::{ContentSource, ItemStream};
use crate::queue::work_item::WorkItem;
use crate::utils::config::EngineConfig;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry name of the feed source
pub const FEED: &str = "feed";

pub struct FeedSource {
    config: Arc<EngineConfig>,
}

impl FeedSource {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }
}

impl ContentSource for FeedSource {
    fn name(&self) -> &str {
        FEED
    }

    fn generate_data(&self, topic: &str, keywords: &[String]) -> ItemStream {
        let path = self.config.feed_path(topic);
        if !path.is_file() {
            debug!("No feed file for {} at {:?}", topic, path);
            return Box::new(std::iter::empty());
        }
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                debug!("No feed for {} at {:?}: {}", topic, path, e);
                return Box::new(std::iter::empty());
            }
        };

        Box::new(read_items(BufReader::new(file), topic, keywords))
    }
}

/// Items of a JSON-lines reader, keyword-filtered
fn read_items<R>(reader: R, topic: &str, keywords: &[String]) -> impl Iterator<Item = WorkItem> + Send
where
    R: BufRead + Send + 'static,
{
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let topic = topic.to_string();
    let reading = topic.clone();

    reader
        .lines()
        .enumerate()
        .map_while(move |(n, line)| match line {
            Ok(line) => Some((n, line)),
            Err(e) => {
                warn!("Feed for {} unreadable at line {}: {}", reading, n + 1, e);
                None
            }
        })
        .filter_map(move |(n, line)| {
            if line.trim().is_empty() {
                return None;
            }
            match serde_json::from_str::<WorkItem>(&line) {
                Ok(item) => Some(item.normalized()),
                Err(e) => {
                    warn!("Skipping malformed feed line {} for {}: {}", n + 1, topic, e);
                    None
                }
            }
        })
        .filter(move |item| {
            if keywords.is_empty() {
                return true;
            }
            let title = item.title.to_lowercase();
            keywords.iter().any(|k| title.contains(k.as_str()))
        })
}
