// src/generation/mod.rs
//! Content generation
//!
//! - **Source**: the `ContentSource` trait and the `GeneratorRegistry`
//!   that maps configured names to sources
//! - **Feed**: the built-in JSON-lines source
//! - **Merger**: interleaves a topic's sources into one deduplicated stream
//! - **Driver**: runs merge passes into the work queue with backoff

pub mod driver;
pub mod feed;
pub mod merger;
pub mod source;

pub use driver::{BackoffEnd, GeneratorDriver};
pub use feed::FeedSource;
pub use merger::{GeneratorMerger, MergedStream};
pub use source::{ContentSource, GeneratorRegistry, ItemStream, StaticSource};
