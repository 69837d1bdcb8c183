// src/queue/backend.rs
//! Queue storage backends
//!
//! A backend keeps, per lane, a FIFO of items, per-agent batches, and the
//! set of item hashes already accepted for that lane. Failures surface as
//! `EngineError::QueueUnavailable` so producers know nothing was queued.

use crate::queue::work_item::WorkItem;
use crate::utils::errors::Result;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Storage behind a [`WorkQueue`](crate::queue::WorkQueue)
pub trait QueueBackend: Send + Sync {
    /// Append to the lane's FIFO
    fn push(&self, lane: &str, item: &WorkItem) -> Result<()>;

    /// Pop the oldest item of the lane's FIFO
    fn pop(&self, lane: &str) -> Result<Option<WorkItem>>;

    /// Append to an agent's batch within a lane
    fn push_batch(&self, lane: &str, agent: &str, item: &WorkItem) -> Result<()>;

    /// Pop the oldest item of an agent's batch
    fn pop_batch(&self, lane: &str, agent: &str) -> Result<Option<WorkItem>>;

    /// FIFO length, batches excluded
    fn len(&self, lane: &str) -> Result<usize>;

    /// FIFO contents in order, without popping
    fn snapshot(&self, lane: &str) -> Result<Vec<WorkItem>>;

    /// Remember a hash; true when it was not seen before
    fn mark_processed(&self, lane: &str, hash: &str) -> Result<bool>;

    /// Undo [`mark_processed`](Self::mark_processed) for an item that never got queued
    fn forget_processed(&self, lane: &str, hash: &str) -> Result<()>;
}

type Lane = Arc<Mutex<VecDeque<WorkItem>>>;

/// In-process backend
#[derive(Default)]
pub struct MemoryQueue {
    lanes: DashMap<String, Lane>,
    batches: DashMap<(String, String), Lane>,
    processed: DashSet<(String, String)>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, lane: &str) -> Lane {
        self.lanes.entry(lane.to_string()).or_default().clone()
    }

    fn batch(&self, lane: &str, agent: &str) -> Lane {
        self.batches
            .entry((lane.to_string(), agent.to_string()))
            .or_default()
            .clone()
    }
}

impl QueueBackend for MemoryQueue {
    fn push(&self, lane: &str, item: &WorkItem) -> Result<()> {
        self.lane(lane).lock().push_back(item.clone());
        Ok(())
    }

    fn pop(&self, lane: &str) -> Result<Option<WorkItem>> {
        Ok(self
            .lanes
            .get(lane)
            .and_then(|queue| queue.lock().pop_front()))
    }

    fn push_batch(&self, lane: &str, agent: &str, item: &WorkItem) -> Result<()> {
        self.batch(lane, agent).lock().push_back(item.clone());
        Ok(())
    }

    fn pop_batch(&self, lane: &str, agent: &str) -> Result<Option<WorkItem>> {
        let key = (lane.to_string(), agent.to_string());
        Ok(self
            .batches
            .get(&key)
            .and_then(|queue| queue.lock().pop_front()))
    }

    fn len(&self, lane: &str) -> Result<usize> {
        Ok(self.lanes.get(lane).map_or(0, |queue| queue.lock().len()))
    }

    fn snapshot(&self, lane: &str) -> Result<Vec<WorkItem>> {
        Ok(self
            .lanes
            .get(lane)
            .map(|queue| queue.lock().iter().cloned().collect())
            .unwrap_or_default())
    }

    fn mark_processed(&self, lane: &str, hash: &str) -> Result<bool> {
        Ok(self.processed.insert((lane.to_string(), hash.to_string())))
    }

    fn forget_processed(&self, lane: &str, hash: &str) -> Result<()> {
        self.processed.remove(&(lane.to_string(), hash.to_string()));
        Ok(())
    }
}
