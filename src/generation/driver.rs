// src/generation/driver.rs
//! Generator driver: periodic merge passes with randomized backoff
//!
//! ```text
//! loop:
//!   generator:<topic> = work
//!   merged stream ──▶ enqueue (comment items into <topic>.comments,
//!                     items for an agent into its batch)
//!   generator:<topic> = sleep  (TTL = backoff + 1s)
//!   backoff ∈ [min, max]  ── ends early on Wanted(<topic> lanes) or cancel
//! ```
//!
//! Needs arrive in-process over the bus channel and, from worker processes,
//! through `need:<lane>` keys of a shared bus.
//!
//! Writing `suspend` under `generator:<topic>` pauses the driver and `stop`
//! ends it.

use crate::generation::merger::GeneratorMerger;
use crate::queue::need::NeedSignal;
use crate::queue::work_item::comment_lane;
use crate::queue::work_queue::WorkQueue;
use crate::state::store::{generator_key, write_state, AgentState, StateStore};
use crate::utils::config::GeneratorConfig;
use crate::utils::errors::Result;
use crate::utils::random::RandomSource;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often the backoff checks for needs
const NEED_POLL: Duration = Duration::from_millis(250);

/// Why a backoff ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffEnd {
    Elapsed,
    Needed,
    Cancelled,
}

/// Runs merge passes for topics and paces them
pub struct GeneratorDriver {
    merger: GeneratorMerger,
    queue: WorkQueue,
    store: Arc<dyn StateStore>,
    needs: Receiver<NeedSignal>,
    min_backoff: Duration,
    max_backoff: Duration,
    poll_interval: Duration,
    rng: RandomSource,
}

impl GeneratorDriver {
    pub fn new(
        merger: GeneratorMerger,
        queue: WorkQueue,
        store: Arc<dyn StateStore>,
        config: &GeneratorConfig,
        rng: RandomSource,
    ) -> Self {
        let needs = queue.needs().subscribe();
        Self {
            merger,
            queue,
            store,
            needs,
            min_backoff: Duration::from_secs(config.min_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            poll_interval: Duration::from_secs(5),
            rng,
        }
    }

    /// Override the backoff range
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max;
        self
    }

    /// Override how often a suspended driver re-reads its state
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn set_state(&self, topic: &str, state: AgentState, ttl: Option<Duration>) {
        if let Err(e) = write_state(self.store.as_ref(), &generator_key(topic), state, ttl) {
            warn!("Failed to record generator state for {}: {}", topic, e);
        }
    }

    /// One merge cycle drained into the queue; returns the number enqueued
    ///
    /// A queue failure aborts the pass with the error. The item that failed
    /// is released so a later pass generates it again.
    pub fn run_once(&mut self, topic: &str) -> Result<usize> {
        self.set_state(topic, AgentState::Work, None);
        info!("Generating work for {}", topic);

        let comments = comment_lane(topic);
        let mut enqueued = 0;
        let mut stream = self.merger.generate(topic);

        for item in stream.by_ref() {
            let item = item?;
            let lane = if item.is_comment() { comments.as_str() } else { topic };
            let hash = item.hash.clone();

            let queued = match item.agent.clone() {
                Some(agent) => self.queue.assign(lane, &agent, item),
                None => self.queue.enqueue(lane, item),
            };
            if let Err(e) = queued {
                if let Err(undo) = self.queue.forget_processed(topic, &hash) {
                    warn!("Failed to release {} for a later pass: {}", hash, undo);
                }
                return Err(e);
            }
            enqueued += 1;
        }

        info!(
            "Generated {} items for {} ({} duplicates dropped)",
            enqueued,
            topic,
            stream.duplicates()
        );
        Ok(enqueued)
    }

    /// Sleep a random backoff; a need for the topic cuts it short
    pub async fn backoff(&mut self, topic: &str, token: &CancellationToken) -> BackoffEnd {
        let millis = self.rng.int_in(
            self.min_backoff.as_millis() as i64,
            self.max_backoff.as_millis() as i64,
        );
        let sleep = Duration::from_millis(millis.max(0) as u64);
        self.set_state(topic, AgentState::Sleep, Some(sleep + Duration::from_secs(1)));
        info!("Generator for {} sleeps {:?}", topic, sleep);

        let comments = comment_lane(topic);
        let deadline = tokio::time::Instant::now() + sleep;

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return BackoffEnd::Elapsed;
            }

            tokio::select! {
                _ = token.cancelled() => return BackoffEnd::Cancelled,
                _ = tokio::time::sleep(NEED_POLL.min(deadline - now)) => {}
            }

            while let Ok(signal) = self.needs.try_recv() {
                if let NeedSignal::Wanted(lane) = signal {
                    if lane == topic || lane == comments {
                        debug!("Need for {} ends backoff early", lane);
                        // the same need may also sit in the store
                        self.queue.needs().take_wanted(&lane);
                        return BackoffEnd::Needed;
                    }
                }
            }

            let needs = self.queue.needs();
            if needs.take_wanted(topic) || needs.take_wanted(&comments) {
                debug!("Recorded need for {} ends backoff early", topic);
                return BackoffEnd::Needed;
            }
        }
    }

    /// Generate for `topic` until stopped or cancelled
    pub async fn run(&mut self, topic: &str, token: CancellationToken) -> Result<()> {
        info!("Generator driver for {} running", topic);

        while !token.is_cancelled() {
            match self.store.get(&generator_key(topic)) {
                Ok(Some(state)) if state == AgentState::Stop.as_str() => {
                    info!("Generator for {} stopped", topic);
                    break;
                }
                Ok(Some(state)) if state == AgentState::Suspend.as_str() => {
                    debug!("Generator for {} suspended", topic);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Cannot read generator state for {}: {}", topic, e),
            }

            if let Err(e) = self.run_once(topic) {
                warn!("Generation pass for {} aborted: {}", topic, e);
            }

            if self.backoff(topic, &token).await == BackoffEnd::Cancelled {
                break;
            }
        }

        info!("Generator driver for {} exiting", topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::source::{GeneratorRegistry, StaticSource};
    use crate::queue::backend::{MemoryQueue, QueueBackend};
    use crate::queue::need::NeedBus;
    use crate::queue::work_item::WorkItem;
    use crate::state::store::{read_state, MemoryStateStore};
    use crate::utils::config::EngineConfig;
    use crate::utils::errors::EngineError;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory backend whose next FIFO push fails once
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryQueue,
        fail_next_push: AtomicBool,
    }

    impl QueueBackend for FlakyBackend {
        fn push(&self, lane: &str, item: &WorkItem) -> Result<()> {
            if self.fail_next_push.swap(false, Ordering::SeqCst) {
                return Err(EngineError::QueueUnavailable("write timed out".into()));
            }
            self.inner.push(lane, item)
        }
        fn pop(&self, lane: &str) -> Result<Option<WorkItem>> {
            self.inner.pop(lane)
        }
        fn push_batch(&self, lane: &str, agent: &str, item: &WorkItem) -> Result<()> {
            self.inner.push_batch(lane, agent, item)
        }
        fn pop_batch(&self, lane: &str, agent: &str) -> Result<Option<WorkItem>> {
            self.inner.pop_batch(lane, agent)
        }
        fn len(&self, lane: &str) -> Result<usize> {
            self.inner.len(lane)
        }
        fn snapshot(&self, lane: &str) -> Result<Vec<WorkItem>> {
            self.inner.snapshot(lane)
        }
        fn mark_processed(&self, lane: &str, hash: &str) -> Result<bool> {
            self.inner.mark_processed(lane, hash)
        }
        fn forget_processed(&self, lane: &str, hash: &str) -> Result<()> {
            self.inner.forget_processed(lane, hash)
        }
    }

    fn driver(items: Vec<WorkItem>) -> (GeneratorDriver, WorkQueue, Arc<dyn StateStore>) {
        driver_over(items, WorkQueue::in_memory(), Arc::new(MemoryStateStore::new()))
    }

    fn driver_over(
        items: Vec<WorkItem>,
        queue: WorkQueue,
        store: Arc<dyn StateStore>,
    ) -> (GeneratorDriver, WorkQueue, Arc<dyn StateStore>) {
        let mut registry = GeneratorRegistry::new();
        registry.register("static", move |_| {
            Arc::new(StaticSource::new("static", items.clone()))
        });

        let mut config = EngineConfig::default();
        config.generator.default_generators = vec!["static".to_string()];
        let config = Arc::new(config);

        let merger = GeneratorMerger::new(
            Arc::new(registry),
            config.clone(),
            queue.clone(),
            RandomSource::seeded(1),
        );
        let driver = GeneratorDriver::new(
            merger,
            queue.clone(),
            store.clone(),
            &config.generator,
            RandomSource::seeded(2),
        );
        (driver, queue, store)
    }

    #[test]
    fn test_run_once_routes_lanes() {
        let (mut driver, queue, store) = driver(vec![
            WorkItem::post("https://a.example", "A"),
            WorkItem::comment("t3_1", "nice"),
            WorkItem::post("https://b.example", "B"),
        ]);

        assert_eq!(driver.run_once("rust").unwrap(), 3);
        assert_eq!(queue.len("rust").unwrap(), 2);
        assert_eq!(queue.len("rust.comments").unwrap(), 1);
        assert_eq!(read_state(store.as_ref(), &generator_key("rust")), AgentState::Work);

        // the same content is not queued twice
        assert_eq!(driver.run_once("rust").unwrap(), 0);
    }

    #[test]
    fn test_failed_enqueue_is_generated_again() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_next_push.store(true, Ordering::SeqCst);
        let queue = WorkQueue::new(backend, NeedBus::new());
        let (mut driver, queue, _) = driver_over(
            vec![WorkItem::post("https://a.example", "A")],
            queue,
            Arc::new(MemoryStateStore::new()),
        );

        let err = driver.run_once("rust").unwrap_err();
        assert!(matches!(err, EngineError::QueueUnavailable(_)));
        assert_eq!(queue.len("rust").unwrap(), 0);

        assert_eq!(driver.run_once("rust").unwrap(), 1);
        assert_eq!(queue.dequeue("rust").unwrap().unwrap().url, "https://a.example");
    }

    #[test]
    fn test_items_for_an_agent_land_in_its_batch() {
        let (mut driver, queue, _) = driver(vec![
            WorkItem::post("https://mine.example", "mine").for_agent("alice"),
            WorkItem::comment("t3_1", "for bob").for_agent("bob"),
        ]);

        assert_eq!(driver.run_once("rust").unwrap(), 2);
        assert_eq!(queue.len("rust").unwrap(), 0);
        assert_eq!(queue.len("rust.comments").unwrap(), 0);

        assert_eq!(queue.dequeue_for("rust", "bob").unwrap(), None);
        assert_eq!(
            queue.dequeue_for("rust", "alice").unwrap().unwrap().url,
            "https://mine.example"
        );
        assert!(queue.dequeue_for("rust.comments", "bob").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_backoff_sets_sleep_and_elapses() {
        let (driver, _, store) = driver(vec![]);
        let mut driver = driver.with_backoff(Duration::from_millis(20), Duration::from_millis(40));
        let token = CancellationToken::new();

        assert_eq!(driver.backoff("rust", &token).await, BackoffEnd::Elapsed);
        assert_eq!(read_state(store.as_ref(), &generator_key("rust")), AgentState::Sleep);
    }

    #[tokio::test]
    async fn test_need_ends_backoff() {
        let (driver, queue, _) = driver(vec![]);
        let mut driver = driver.with_backoff(Duration::from_secs(60), Duration::from_secs(60));
        let token = CancellationToken::new();

        queue.publish_need("go");
        queue.publish_need("rust.comments");

        let end = tokio::time::timeout(Duration::from_secs(5), driver.backoff("rust", &token))
            .await
            .unwrap();
        assert_eq!(end, BackoffEnd::Needed);
    }

    #[tokio::test]
    async fn test_need_from_another_process_ends_backoff() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let queue = WorkQueue::new(
            Arc::new(MemoryQueue::new()),
            NeedBus::shared(store.clone(), Duration::from_secs(60)),
        );
        let (driver, _, _) = driver_over(vec![], queue, store.clone());
        let mut driver = driver.with_backoff(Duration::from_secs(60), Duration::from_secs(60));

        // a worker's queue: its own bus over the same store
        let worker_queue = WorkQueue::new(
            Arc::new(MemoryQueue::new()),
            NeedBus::shared(store.clone(), Duration::from_secs(60)),
        );
        worker_queue.publish_need("rust");

        let end = tokio::time::timeout(
            Duration::from_secs(5),
            driver.backoff("rust", &CancellationToken::new()),
        )
        .await
        .unwrap();
        assert_eq!(end, BackoffEnd::Needed);
        assert_eq!(store.get(&crate::state::store::need_key("rust")).unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_stop_state() {
        let (driver, queue, store) = driver(vec![WorkItem::post("https://a.example", "A")]);
        let mut driver = driver
            .with_backoff(Duration::from_secs(60), Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(10));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), driver.run("rust", token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.len("rust").unwrap(), 1);

        // an explicit stop ends the loop before any pass
        write_state(store.as_ref(), &generator_key("go"), AgentState::Stop, None).unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            driver.run("go", CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
