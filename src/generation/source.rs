// src/generation/source.rs
//! Content sources and their registry

use crate::queue::work_item::WorkItem;
use crate::utils::config::EngineConfig;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lazy, possibly finite stream of work items
pub type ItemStream = Box<dyn Iterator<Item = WorkItem> + Send>;

/// A content-generation algorithm attached to topics
pub trait ContentSource: Send + Sync {
    fn name(&self) -> &str;

    /// Start a fresh pass over the source for `topic`
    ///
    /// Exhaustion of the returned iterator is normal termination.
    fn generate_data(&self, topic: &str, keywords: &[String]) -> ItemStream;
}

/// Builds a source from the engine configuration
pub type SourceFactory = Box<dyn Fn(&Arc<EngineConfig>) -> Arc<dyn ContentSource> + Send + Sync>;

/// Named source factories, built once at startup
#[derive(Default)]
pub struct GeneratorRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in sources
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::generation::feed::FEED, |config| {
            Arc::new(crate::generation::feed::FeedSource::new(config.clone()))
        });
        registry
    }

    /// Add or replace a factory
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Arc<EngineConfig>) -> Arc<dyn ContentSource> + Send + Sync + 'static,
    {
        debug!("Registering content source '{}'", name);
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Instantiate a source; `None` for unknown names
    pub fn build(&self, name: &str, config: &Arc<EngineConfig>) -> Option<Arc<dyn ContentSource>> {
        self.factories.get(name).map(|factory| factory(config))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("sources", &self.names())
            .finish()
    }
}

/// Source over a fixed list, mostly useful in tests and demos
pub struct StaticSource {
    name: String,
    items: Vec<WorkItem>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, items: Vec<WorkItem>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }
}

impl ContentSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_data(&self, _topic: &str, _keywords: &[String]) -> ItemStream {
        Box::new(self.items.clone().into_iter())
    }
}
