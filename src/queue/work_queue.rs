// src/queue/work_queue.rs
//! Topic work queue facade
//!
//! ```text
//! generator ──enqueue──▶ [lane FIFO] ──dequeue──────────▶ any agent
//!           ──assign───▶ [agent batch] ──dequeue_for──▶ that agent (first)
//!                 │
//!                 └──▶ NeedBus: Enqueued(lane)
//! ```
//!
//! Items carrying an `agent` go to that agent's batch via `assign`.
//!
//! Delivery is at-least-once from the producer's side and at-most-once per
//! pop: an item popped by a worker that then crashes is lost.

use crate::queue::backend::{MemoryQueue, QueueBackend};
use crate::queue::need::{NeedBus, NeedSignal};
use crate::queue::work_item::WorkItem;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-topic FIFO plus per-agent batches over a shared backend
#[derive(Clone)]
pub struct WorkQueue {
    backend: Arc<dyn QueueBackend>,
    needs: NeedBus,
}

impl WorkQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, needs: NeedBus) -> Self {
        Self { backend, needs }
    }

    /// Queue backed by memory, for tests and single-process runs
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryQueue::new()), NeedBus::new())
    }

    pub fn needs(&self) -> &NeedBus {
        &self.needs
    }

    /// Append to the lane's FIFO and announce it
    pub fn enqueue(&self, lane: &str, item: WorkItem) -> Result<()> {
        let item = item.normalized();
        self.backend.push(lane, &item).map_err(unavailable)?;

        metrics::counter!("troupe_queue_enqueued_total", "topic" => lane.to_string()).increment(1);
        debug!("Enqueued {} into {}", item.hash, lane);

        self.needs.publish(NeedSignal::Enqueued(lane.to_string()));
        Ok(())
    }

    /// Pop the oldest item of the lane
    pub fn dequeue(&self, lane: &str) -> Result<Option<WorkItem>> {
        self.backend.pop(lane).map_err(unavailable)
    }

    /// Put an item into an agent's batch
    pub fn assign(&self, lane: &str, agent: &str, item: WorkItem) -> Result<()> {
        let item = item.normalized();
        self.backend
            .push_batch(lane, agent, &item)
            .map_err(unavailable)?;
        debug!("Assigned {} in {} to {}", item.hash, lane, agent);
        Ok(())
    }

    /// The agent's batch first, then the shared FIFO
    pub fn dequeue_for(&self, lane: &str, agent: &str) -> Result<Option<WorkItem>> {
        if let Some(item) = self.backend.pop_batch(lane, agent).map_err(unavailable)? {
            return Ok(Some(item));
        }
        self.dequeue(lane)
    }

    pub fn len(&self, lane: &str) -> Result<usize> {
        self.backend.len(lane).map_err(unavailable)
    }

    pub fn is_empty(&self, lane: &str) -> Result<bool> {
        Ok(self.len(lane)? == 0)
    }

    pub fn snapshot(&self, lane: &str) -> Result<Vec<WorkItem>> {
        self.backend.snapshot(lane).map_err(unavailable)
    }

    /// Record a hash for the lane; false for duplicates
    pub fn mark_processed(&self, lane: &str, hash: &str) -> Result<bool> {
        self.backend.mark_processed(lane, hash).map_err(unavailable)
    }

    /// Drop a recorded hash so the item can be generated again
    pub fn forget_processed(&self, lane: &str, hash: &str) -> Result<()> {
        self.backend.forget_processed(lane, hash).map_err(unavailable)
    }

    /// Tell producers the lane ran dry
    pub fn publish_need(&self, lane: &str) {
        let listeners = self.needs.publish(NeedSignal::Wanted(lane.to_string()));
        if listeners == 0 && !self.needs.is_shared() {
            warn!("No producer is listening for work on {}", lane);
        }
    }
}

/// Everything a backend raises is an unavailability of the queue
fn unavailable(e: EngineError) -> EngineError {
    match e {
        EngineError::QueueUnavailable(_) => e,
        other => EngineError::QueueUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownBackend;

    impl QueueBackend for DownBackend {
        fn push(&self, _: &str, _: &WorkItem) -> Result<()> {
            Err(EngineError::StorageFailed("connection refused".into()))
        }
        fn pop(&self, _: &str) -> Result<Option<WorkItem>> {
            Err(EngineError::StorageFailed("connection refused".into()))
        }
        fn push_batch(&self, _: &str, _: &str, _: &WorkItem) -> Result<()> {
            Err(EngineError::StorageFailed("connection refused".into()))
        }
        fn pop_batch(&self, _: &str, _: &str) -> Result<Option<WorkItem>> {
            Err(EngineError::StorageFailed("connection refused".into()))
        }
        fn len(&self, _: &str) -> Result<usize> {
            Err(EngineError::StorageFailed("connection refused".into()))
        }
        fn snapshot(&self, _: &str) -> Result<Vec<WorkItem>> {
            Err(EngineError::StorageFailed("connection refused".into()))
        }
        fn mark_processed(&self, _: &str, _: &str) -> Result<bool> {
            Err(EngineError::StorageFailed("connection refused".into()))
        }
        fn forget_processed(&self, _: &str, _: &str) -> Result<()> {
            Err(EngineError::StorageFailed("connection refused".into()))
        }
    }

    #[test]
    fn test_fifo_without_interleaving() {
        let queue = WorkQueue::in_memory();
        for url in ["x", "y", "z"] {
            queue.enqueue("rust", WorkItem::post(url, url)).unwrap();
            queue.enqueue("go", WorkItem::post(format!("go-{}", url), url)).unwrap();
        }

        let drained: Vec<String> = std::iter::from_fn(|| queue.dequeue("rust").unwrap())
            .map(|item| item.url)
            .collect();
        assert_eq!(drained, vec!["x", "y", "z"]);
        assert!(queue.is_empty("rust").unwrap());
        assert_eq!(queue.len("go").unwrap(), 3);
        assert_eq!(queue.snapshot("go").unwrap()[0].url, "go-x");
    }

    #[test]
    fn test_enqueue_announces() {
        let queue = WorkQueue::in_memory();
        let signals = queue.needs().subscribe();

        queue.enqueue("rust", WorkItem::post("a", "a")).unwrap();
        assert_eq!(signals.try_recv().unwrap(), NeedSignal::Enqueued("rust".into()));

        queue.publish_need("rust.comments");
        assert_eq!(
            signals.try_recv().unwrap(),
            NeedSignal::Wanted("rust.comments".into())
        );
    }

    #[test]
    fn test_batch_read_before_fifo() {
        let queue = WorkQueue::in_memory();
        queue.enqueue("rust", WorkItem::post("shared", "s")).unwrap();
        queue.assign("rust", "alice", WorkItem::post("mine", "m")).unwrap();

        assert_eq!(queue.dequeue_for("rust", "alice").unwrap().unwrap().url, "mine");
        assert_eq!(queue.dequeue_for("rust", "alice").unwrap().unwrap().url, "shared");
        assert_eq!(queue.dequeue_for("rust", "alice").unwrap(), None);
    }

    #[test]
    fn test_backend_failures_are_distinguishable() {
        let queue = WorkQueue::new(Arc::new(DownBackend), NeedBus::new());
        let signals = queue.needs().subscribe();

        let err = queue.enqueue("rust", WorkItem::post("a", "a")).unwrap_err();
        assert!(matches!(err, EngineError::QueueUnavailable(_)));
        // nothing announced for an item that was not queued
        assert!(signals.try_recv().is_err());

        assert!(matches!(
            queue.dequeue("rust"),
            Err(EngineError::QueueUnavailable(_))
        ));
        assert!(matches!(
            queue.dequeue_for("rust", "alice"),
            Err(EngineError::QueueUnavailable(_))
        ));
        assert!(matches!(
            queue.forget_processed("rust", "h"),
            Err(EngineError::QueueUnavailable(_))
        ));
    }
}
