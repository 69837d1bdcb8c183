// src/generation/merger.rs
//! Fair interleaving of a topic's content sources
//!
//! One merge cycle runs in passes. Each pass pulls at most one item from
//! every source that has not stopped yet, in the current order; after a
//! pass the order is shuffled. A source that runs dry is marked stopped for
//! the rest of the cycle, and the cycle ends once all of them stopped.
//!
//! ```text
//! pass 1:  A1  B1  C1        order A B C
//! pass 2:  C2  A2  (B done)  order C A B  (shuffled)
//! pass 3:  A3  (C done)      order A C B
//! ```
//!
//! Every item is checked against the topic's processed hashes before it is
//! yielded; duplicates are dropped silently.

use crate::generation::source::{ContentSource, GeneratorRegistry, ItemStream};
use crate::queue::work_item::WorkItem;
use crate::queue::work_queue::WorkQueue;
use crate::utils::config::EngineConfig;
use crate::utils::errors::Result;
use crate::utils::random::RandomSource;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A source attached to one topic
#[derive(Clone)]
struct GeneratorHandle {
    id: usize,
    source: Arc<dyn ContentSource>,
}

/// Merges the sources of each topic into one stream
pub struct GeneratorMerger {
    registry: Arc<GeneratorRegistry>,
    config: Arc<EngineConfig>,
    queue: WorkQueue,
    rng: RandomSource,

    /// Handles built on first use, per topic
    handles: HashMap<String, Vec<GeneratorHandle>>,
}

impl GeneratorMerger {
    pub fn new(
        registry: Arc<GeneratorRegistry>,
        config: Arc<EngineConfig>,
        queue: WorkQueue,
        rng: RandomSource,
    ) -> Self {
        Self {
            registry,
            config,
            queue,
            rng,
            handles: HashMap::new(),
        }
    }

    fn handles_for(&mut self, topic: &str) -> Vec<GeneratorHandle> {
        if let Some(handles) = self.handles.get(topic) {
            return handles.clone();
        }

        let topic_config = self.config.topic(topic);
        let handles: Vec<GeneratorHandle> = topic_config
            .generators
            .iter()
            .filter_map(|name| {
                let source = self.registry.build(name, &self.config);
                if source.is_none() {
                    warn!("Unknown content source '{}' for topic {}", name, topic);
                }
                source
            })
            .enumerate()
            .map(|(id, source)| GeneratorHandle { id, source })
            .collect();

        debug!("Topic {} merges {} sources", topic, handles.len());
        self.handles.insert(topic.to_string(), handles.clone());
        handles
    }

    /// Number of cached sources for a topic
    pub fn source_count(&self, topic: &str) -> Option<usize> {
        self.handles.get(topic).map(Vec::len)
    }

    /// Start a merge cycle for `topic`
    pub fn generate(&mut self, topic: &str) -> MergedStream<'_> {
        let keywords = self.config.topic(topic).keywords;
        let streams: Vec<(usize, ItemStream)> = self
            .handles_for(topic)
            .into_iter()
            .map(|handle| (handle.id, handle.source.generate_data(topic, &keywords)))
            .collect();

        MergedStream {
            topic: topic.to_string(),
            order: (0..streams.len()).collect(),
            streams,
            cursor: 0,
            stopped: HashSet::new(),
            duplicates: 0,
            queue: &self.queue,
            rng: &mut self.rng,
        }
    }
}

/// Items of one merge cycle, already deduplicated
///
/// Yields `Err` when the processed-hash check cannot reach the queue.
pub struct MergedStream<'a> {
    topic: String,
    streams: Vec<(usize, ItemStream)>,

    /// Slots into `streams` for the current pass
    order: Vec<usize>,
    cursor: usize,

    /// Ids of sources that ran dry this cycle
    stopped: HashSet<usize>,

    duplicates: usize,
    queue: &'a WorkQueue,
    rng: &'a mut RandomSource,
}

impl MergedStream<'_> {
    /// Duplicates dropped so far
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

impl Iterator for MergedStream<'_> {
    type Item = Result<WorkItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stopped.len() == self.streams.len() {
                return None;
            }

            if self.cursor >= self.order.len() {
                self.rng.shuffle(&mut self.order);
                self.cursor = 0;
                continue;
            }

            let slot = self.order[self.cursor];
            self.cursor += 1;

            let (id, stream) = &mut self.streams[slot];
            if self.stopped.contains(id) {
                continue;
            }

            let item = match stream.next() {
                Some(item) => item.normalized(),
                None => {
                    trace!("Source {} of {} exhausted", id, self.topic);
                    self.stopped.insert(*id);
                    continue;
                }
            };

            match self.queue.mark_processed(&self.topic, &item.hash) {
                Ok(true) => return Some(Ok(item)),
                Ok(false) => {
                    self.duplicates += 1;
                    metrics::counter!(
                        "troupe_queue_dropped_duplicates_total",
                        "topic" => self.topic.clone()
                    )
                    .increment(1);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::source::StaticSource;
    use crate::utils::config::TopicConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn item(url: &str) -> WorkItem {
        WorkItem::post(url, url)
    }

    /// Counts how often a pass was started
    struct CountingSource {
        starts: Arc<AtomicUsize>,
    }

    impl ContentSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn generate_data(&self, _topic: &str, _keywords: &[String]) -> ItemStream {
            let n = self.starts.fetch_add(1, Ordering::SeqCst);
            Box::new(std::iter::once(item(&format!("count-{}", n))))
        }
    }

    fn merger_with(
        sources: Vec<(&str, Vec<WorkItem>)>,
        seed: u64,
    ) -> (GeneratorMerger, WorkQueue) {
        let mut registry = GeneratorRegistry::new();
        let mut config = EngineConfig::default();
        let mut names = Vec::new();

        for (name, items) in sources {
            let owned = name.to_string();
            registry.register(name, move |_| Arc::new(StaticSource::new(owned.clone(), items.clone())));
            names.push(name.to_string());
        }
        names.push("missing".to_string());

        config.topics.insert(
            "rust".to_string(),
            TopicConfig {
                generators: names,
                ..Default::default()
            },
        );

        let queue = WorkQueue::in_memory();
        let merger = GeneratorMerger::new(
            Arc::new(registry),
            Arc::new(config),
            queue.clone(),
            RandomSource::seeded(seed),
        );
        (merger, queue)
    }

    #[test]
    fn test_merges_every_source_once() {
        let (mut merger, _) = merger_with(
            vec![("a", vec![item("a"), item("b")]), ("c", vec![item("c")])],
            1,
        );

        let urls: HashSet<String> = merger
            .generate("rust")
            .map(|item| item.unwrap().url)
            .collect();
        let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(urls, expected);
        // the unknown source name is skipped
        assert_eq!(merger.source_count("rust"), Some(2));
    }

    #[test]
    fn test_first_pass_keeps_declared_order() {
        let (mut merger, _) = merger_with(
            vec![
                ("a", vec![item("a1"), item("a2")]),
                ("b", vec![item("b1"), item("b2")]),
            ],
            2,
        );

        let urls: Vec<String> = merger
            .generate("rust")
            .map(|item| item.unwrap().url)
            .collect();
        assert_eq!(&urls[..2], &["a1", "b1"]);
        assert_eq!(urls.len(), 4);
    }

    #[test]
    fn test_duplicates_dropped_across_sources_and_cycles() {
        let (mut merger, queue) = merger_with(
            vec![
                ("a", vec![item("x"), item("y")]),
                ("b", vec![item("y"), item("z")]),
            ],
            3,
        );

        let mut stream = merger.generate("rust");
        let first: Vec<String> = stream.by_ref().map(|item| item.unwrap().url).collect();
        assert_eq!(first.len(), 3);
        assert_eq!(stream.duplicates(), 1);

        // a second cycle re-runs the sources but everything was seen
        assert_eq!(merger.generate("rust").count(), 0);
        assert!(!queue.mark_processed("rust", &item("x").hash).unwrap());
    }

    #[test]
    fn test_sources_restart_each_cycle() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut registry = GeneratorRegistry::new();
        let shared = starts.clone();
        registry.register("counting", move |_| {
            Arc::new(CountingSource {
                starts: shared.clone(),
            })
        });

        let mut config = EngineConfig::default();
        config.generator.default_generators = vec!["counting".to_string()];

        let mut merger = GeneratorMerger::new(
            Arc::new(registry),
            Arc::new(config),
            WorkQueue::in_memory(),
            RandomSource::seeded(4),
        );

        assert_eq!(merger.generate("go").count(), 1);
        assert_eq!(merger.generate("go").count(), 1);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_topic_without_sources_is_empty() {
        let (mut merger, _) = merger_with(vec![], 5);
        assert_eq!(merger.generate("rust").count(), 0);
    }
}
