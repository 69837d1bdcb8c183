// src/runtime/worker.rs
//! Agent worker: the loop that runs inside a worker process
//!
//! # Loop
//!
//! ```text
//! ┌─▶ checkpoint ── STOP/absent/cancel ──▶ exit
//! │      │ SUSPEND: poll until it changes
//! │      ▼ WORK/SLEEP
//! │   choose category (budget scheduler)
//! │      ▼
//! │   plan + perform (executor) ── ok ──▶ register + record
//! │      ▼
//! │   cycle done? ── yes ──▶ SLEEP (TTL), rest, redraw budget, WORK
//! │      ▼
//! └── random wait
//! ```
//!
//! Production categories pull from the work queue. An empty lane publishes
//! a need for it and the worker consumes instead.
//!
//! A background [`Heartbeat`] keeps `worker:<agent>` fresh for the whole run,
//! including while an action is in flight.

use crate::queue::work_item::{comment_lane, WorkItem};
use crate::queue::work_queue::WorkQueue;
use crate::recording::action_log::ActionSink;
use crate::runtime::executor::{ActionExecutor, PlannedAction};
use crate::scheduling::budget::{ActionBudgetScheduler, ActionCategory, Budget, BudgetLimits};
use crate::scheduling::sampler::pick_near;
use crate::state::store::{read_state, state_key, worker_key, write_state, AgentState, StateStore};
use crate::utils::config::{BehaviorConfig, EngineConfig, WorkerConfig};
use crate::utils::errors::{EngineError, Result};
use crate::utils::random::RandomSource;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, trace, warn};

/// What a checkpoint tells the worker to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Exit,
}

/// Background refresh of a worker's pid heartbeat
///
/// Runs for as long as the worker does, so a slow action never lets
/// `worker:<agent>` expire.
pub struct Heartbeat {
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Stop refreshing and wait for the last write to land
    pub async fn stop(self) {
        drop(self.guard);
        if let Err(e) = self.handle.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }
    }
}

/// Cooperative cancellation context of a worker
///
/// Reads the agent's state from the store at every yield point and keeps
/// the pid heartbeat alive while doing so.
pub struct WorkerControl {
    agent: String,
    store: Arc<dyn StateStore>,
    token: CancellationToken,
    pid: u32,
    poll_interval: Duration,
    heartbeat_ttl: Duration,
}

impl WorkerControl {
    pub fn new(
        agent: &str,
        store: Arc<dyn StateStore>,
        config: &WorkerConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            agent: agent.to_string(),
            store,
            token,
            pid: std::process::id(),
            poll_interval: config.poll_interval(),
            heartbeat_ttl: config.heartbeat_ttl(),
        }
    }

    /// Override poll interval and heartbeat TTL
    pub fn with_intervals(mut self, poll_interval: Duration, heartbeat_ttl: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.heartbeat_ttl = heartbeat_ttl;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Refresh `worker:<agent>` with our pid
    pub fn heartbeat(&self) {
        if let Err(e) = self.store.set(
            &worker_key(&self.agent),
            &self.pid.to_string(),
            Some(self.heartbeat_ttl),
        ) {
            warn!("Heartbeat for {} failed: {}", self.agent, e);
        }
    }

    /// Refresh the heartbeat every third of its TTL until stopped or cancelled
    pub fn keep_alive(&self) -> Heartbeat {
        let token = self.token.child_token();
        let stopped = token.clone();
        let store = self.store.clone();
        let agent = self.agent.clone();
        let key = worker_key(&self.agent);
        let pid = self.pid.to_string();
        let ttl = self.heartbeat_ttl;
        let every = (ttl / 3).max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
                if let Err(e) = store.set(&key, &pid, Some(ttl)) {
                    warn!("Heartbeat for {} failed: {}", agent, e);
                }
            }
        });

        Heartbeat {
            guard: token.drop_guard(),
            handle,
        }
    }

    pub fn state(&self) -> AgentState {
        read_state(self.store.as_ref(), &state_key(&self.agent))
    }

    /// Self-report a state
    pub fn report(&self, state: AgentState, ttl: Option<Duration>) {
        if let Err(e) = write_state(self.store.as_ref(), &state_key(&self.agent), state, ttl) {
            warn!("Failed to report {} for {}: {}", state, self.agent, e);
        }
    }

    /// Yield point: continue, wait out a suspension, or exit
    pub async fn checkpoint(&self) -> Directive {
        let mut suspended = false;
        loop {
            if self.token.is_cancelled() {
                return Directive::Exit;
            }
            self.heartbeat();

            match self.state() {
                AgentState::Work | AgentState::Sleep => {
                    if suspended {
                        info!("Agent {} resumed", self.agent);
                    }
                    return Directive::Continue;
                }
                AgentState::Suspend => {
                    if !suspended {
                        info!("Agent {} suspended, pausing", self.agent);
                        suspended = true;
                    }
                    if !self.pause(self.poll_interval).await {
                        return Directive::Exit;
                    }
                }
                AgentState::Stop => {
                    info!("Agent {} told to stop", self.agent);
                    return Directive::Exit;
                }
            }
        }
    }

    /// Cancellable sleep; false when cancelled
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Long sleep in poll-sized steps, keeping the heartbeat alive
    ///
    /// Ends early with `Exit` on cancellation or STOP.
    pub async fn rest(&self, duration: Duration) -> Directive {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Directive::Continue;
            }
            if !self.pause(self.poll_interval.min(deadline - now)).await {
                return Directive::Exit;
            }
            self.heartbeat();
            if self.state() == AgentState::Stop {
                info!("Agent {} stopped while resting", self.agent);
                return Directive::Exit;
            }
        }
    }

    /// Drop the heartbeat if it is still ours
    pub fn release(&self) {
        let key = worker_key(&self.agent);
        match self.store.get(&key) {
            Ok(Some(pid)) if pid == self.pid.to_string() => {
                if let Err(e) = self.store.delete(&key) {
                    warn!("Failed to release heartbeat of {}: {}", self.agent, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot read heartbeat of {}: {}", self.agent, e),
        }
    }
}

/// One agent's action loop
pub struct AgentWorker {
    agent: String,
    topics: Vec<String>,
    limits: BudgetLimits,
    overrides: HashMap<String, i64>,
    behavior: BehaviorConfig,
    actions_per_cycle: u64,
    min_cycle_sleep: u64,
    max_cycle_sleep: u64,

    scheduler: ActionBudgetScheduler,
    queue: WorkQueue,
    executor: Arc<dyn ActionExecutor>,
    sink: Arc<dyn ActionSink>,
    control: WorkerControl,
    rng: RandomSource,

    /// Subjects already acted on
    processed: HashSet<String>,
}

impl AgentWorker {
    pub fn new(
        agent: &str,
        config: &EngineConfig,
        queue: WorkQueue,
        executor: Arc<dyn ActionExecutor>,
        sink: Arc<dyn ActionSink>,
        control: WorkerControl,
        mut rng: RandomSource,
    ) -> Result<Self> {
        let agent_config = config.agent(agent)?;
        if agent_config.topics.is_empty() {
            return Err(EngineError::ConfigError(format!(
                "Agent '{}' has no topics configured",
                agent
            )));
        }

        let budget = Budget::draw(&config.budget, &mut rng).with_overrides(&agent_config.budget);
        debug!("Initial budget for {}: {:?}", agent, budget);

        Ok(Self {
            agent: agent.to_string(),
            topics: agent_config.topics.clone(),
            limits: config.budget.clone(),
            overrides: agent_config.budget.clone(),
            behavior: config.behavior_for(agent),
            actions_per_cycle: config.worker.actions_per_cycle,
            min_cycle_sleep: config.worker.min_cycle_sleep_secs,
            max_cycle_sleep: config.worker.max_cycle_sleep_secs,
            scheduler: ActionBudgetScheduler::new(budget),
            queue,
            executor,
            sink,
            control,
            rng,
            processed: HashSet::new(),
        })
    }

    pub fn scheduler(&self) -> &ActionBudgetScheduler {
        &self.scheduler
    }

    /// Run until stopped or cancelled; returns the number of registered actions
    pub async fn run(mut self) -> Result<u64> {
        info!(
            "Worker for {} running on {:?} with targets {:?}",
            self.agent,
            self.topics,
            self.scheduler.targets()
        );

        let heartbeat = self.control.keep_alive();
        let mut registered = 0u64;

        loop {
            if self.control.checkpoint().await == Directive::Exit {
                break;
            }

            let category = match self.scheduler.choose(&mut self.rng) {
                Some(category) => category,
                None => {
                    error!("Agent {} has an empty budget", self.agent);
                    break;
                }
            };
            trace!("{} chose {}", self.agent, category);

            match self.step(category).await {
                Ok(0) => {
                    debug!("{} found nothing to {}", self.agent, category);
                    if !self.control.pause(self.control.poll_interval()).await {
                        break;
                    }
                }
                Ok(n) => registered += n,
                Err(e) if e.is_backend_failure() => {
                    metrics::counter!("troupe_action_failures_total").increment(1);
                    warn!("{} cannot reach a backend: {}", self.agent, e);
                    if !self.control.pause(self.control.poll_interval()).await {
                        break;
                    }
                }
                Err(e) => {
                    metrics::counter!("troupe_action_failures_total").increment(1);
                    warn!("{} failed to {}: {}", self.agent, category, e);
                }
            }

            if self.scheduler.total() >= self.actions_per_cycle
                && self.rest().await == Directive::Exit
            {
                break;
            }

            if !self.wait(self.behavior.max_wait_secs).await {
                break;
            }
            tokio::task::yield_now().await;
        }

        heartbeat.stop().await;
        self.control.release();
        info!("Worker for {} exiting after {} actions", self.agent, registered);
        Ok(registered)
    }

    /// Plan and perform one scheduled category
    async fn step(&mut self, category: ActionCategory) -> Result<u64> {
        let topic = match self.rng.choose(&self.topics) {
            Some(topic) => topic.clone(),
            None => return Ok(0),
        };

        match category {
            ActionCategory::Consume => self.consume(&topic).await,
            ActionCategory::Vote => self.vote(&topic).await,
            ActionCategory::Comment => {
                let lane = comment_lane(&topic);
                match self.queue.dequeue_for(&lane, &self.agent)? {
                    Some(work) => self.comment(&topic, work).await,
                    None => {
                        debug!("No comment work for {} in {}", self.agent, lane);
                        self.queue.publish_need(&lane);
                        self.consume(&topic).await
                    }
                }
            }
            ActionCategory::Produce => match self.queue.dequeue_for(&topic, &self.agent)? {
                Some(work) => self.produce(&topic, work).await,
                None => {
                    debug!("No post work for {} in {}", self.agent, topic);
                    self.queue.publish_need(&topic);
                    self.consume(&topic).await
                }
            },
        }
    }

    /// A random unseen item of the topic listing
    async fn unseen_item(&mut self, topic: &str) -> Result<Option<String>> {
        let listing = self.executor.listing(topic).await?;
        let unseen: Vec<&String> = listing
            .iter()
            .filter(|item| !self.processed.contains(*item))
            .collect();
        Ok(self.rng.choose(&unseen).map(|item| (*item).clone()))
    }

    async fn consume(&mut self, topic: &str) -> Result<u64> {
        match self.unseen_item(topic).await? {
            Some(item) => self.see(topic, item).await,
            None => Ok(0),
        }
    }

    /// Consume an item, then maybe vote on it
    async fn see(&mut self, topic: &str, item: String) -> Result<u64> {
        self.execute(PlannedAction::Consume {
            topic: topic.to_string(),
            item: item.clone(),
        })
        .await?;
        let mut count = 1;

        if !self.wait(self.behavior.max_wait_secs).await {
            return Ok(count);
        }

        if self.behavior.wants_to(self.behavior.post_vote, &mut self.rng)
            && self.scheduler.can_do(ActionCategory::Vote)
        {
            let direction = if self.rng.flip() { 1 } else { -1 };
            match self
                .execute(PlannedAction::Vote {
                    topic: topic.to_string(),
                    item,
                    direction,
                })
                .await
            {
                Ok(()) => count += 1,
                Err(e) => warn!("{} failed to vote after consuming: {}", self.agent, e),
            }
            self.wait(self.behavior.max_wait_secs / 2).await;
        }

        Ok(count)
    }

    async fn vote(&mut self, topic: &str) -> Result<u64> {
        let item = match self.unseen_item(topic).await? {
            Some(item) => item,
            None => return Ok(0),
        };
        let direction = if self.rng.flip() { 1 } else { -1 };
        self.execute(PlannedAction::Vote {
            topic: topic.to_string(),
            item,
            direction,
        })
        .await?;
        Ok(1)
    }

    /// Consume the left neighborhood, comment, maybe vote on the commented
    /// item, consume the right neighborhood
    async fn comment(&mut self, topic: &str, work: WorkItem) -> Result<u64> {
        if self.processed.contains(&work.hash) {
            debug!("{} already commented {}", self.agent, work.hash);
            return Ok(0);
        }

        let target = work.target.clone().unwrap_or_default();
        let listing = self.executor.listing(topic).await?;
        let (left, right) = match listing.iter().position(|item| *item == target) {
            Some(index) => {
                let (left, right) =
                    pick_near(&listing, index, self.behavior.max_posts_near, &mut self.rng);
                (
                    left.into_iter().cloned().collect::<Vec<_>>(),
                    right.into_iter().cloned().collect::<Vec<_>>(),
                )
            }
            None => {
                debug!("Comment target {} is not listed in {}", target, topic);
                (Vec::new(), Vec::new())
            }
        };

        let mut count = self.see_all(topic, left).await;
        if self.control.token().is_cancelled() {
            return Ok(count);
        }

        self.execute(PlannedAction::Comment {
            topic: topic.to_string(),
            work,
        })
        .await?;
        count += 1;

        if !target.is_empty()
            && self.behavior.wants_to(self.behavior.comment_vote, &mut self.rng)
            && self.scheduler.can_do(ActionCategory::Vote)
        {
            let direction = if self.rng.flip() { 1 } else { -1 };
            match self
                .execute(PlannedAction::Vote {
                    topic: topic.to_string(),
                    item: target,
                    direction,
                })
                .await
            {
                Ok(()) => count += 1,
                Err(e) => warn!("{} failed to vote after commenting: {}", self.agent, e),
            }
        }

        count += self.see_all(topic, right).await;
        Ok(count)
    }

    /// Consume several items; failures are logged and skipped
    async fn see_all(&mut self, topic: &str, items: Vec<String>) -> u64 {
        let mut count = 0;
        for item in items {
            if self.control.token().is_cancelled() {
                break;
            }
            if self.processed.contains(&item) {
                continue;
            }
            match self.see(topic, item).await {
                Ok(n) => count += n,
                Err(e) => warn!("{} failed to consume near a comment: {}", self.agent, e),
            }
        }
        count
    }

    async fn produce(&mut self, topic: &str, work: WorkItem) -> Result<u64> {
        let route = work.route.clone().unwrap_or_else(|| topic.to_string());
        self.execute(PlannedAction::Produce { route, work }).await?;
        Ok(1)
    }

    /// Perform through the executor and register on success
    async fn execute(&mut self, action: PlannedAction) -> Result<()> {
        let response = self.executor.perform(&self.agent, &action).await?;
        self.register(&action, response);
        Ok(())
    }

    fn register(&mut self, action: &PlannedAction, response: serde_json::Value) {
        let category = action.category();
        self.scheduler.register(category);
        self.processed.insert(action.subject().to_string());

        metrics::counter!("troupe_actions_total", "category" => category.as_str()).increment(1);

        let info = json!({ "action": action, "response": response });
        if let Err(e) = self.sink.record(&self.agent, category, &info) {
            warn!("Failed to record {} by {}: {}", category, self.agent, e);
        }

        info!("step by [{}] |{}|: {}", self.agent, category, action.subject());
    }

    /// Random pause of up to `max_secs`; false when cancelled
    async fn wait(&mut self, max_secs: u64) -> bool {
        let secs = if max_secs > 1 {
            self.rng.int_in(1, max_secs as i64) as u64
        } else {
            max_secs
        };
        if secs == 0 {
            return !self.control.token().is_cancelled();
        }
        self.control.pause(Duration::from_secs(secs)).await
    }

    /// End of a work cycle: report SLEEP, rest, redraw, report WORK
    async fn rest(&mut self) -> Directive {
        let secs = self
            .rng
            .int_in(self.min_cycle_sleep as i64, self.max_cycle_sleep as i64)
            .max(0) as u64;
        let duration = Duration::from_secs(secs);

        info!(
            "{} finished a cycle of {} actions, sleeping {:?}",
            self.agent,
            self.scheduler.total(),
            duration
        );
        match self.control.state() {
            AgentState::Stop => return Directive::Exit,
            AgentState::Suspend => {}
            AgentState::Work | AgentState::Sleep => self
                .control
                .report(AgentState::Sleep, Some(duration + self.control.heartbeat_ttl)),
        }

        if self.control.rest(duration).await == Directive::Exit {
            return Directive::Exit;
        }

        self.scheduler
            .begin_cycle(&self.limits, &self.overrides, &mut self.rng);

        // a suspension written while resting stays in place
        if self.control.state() == AgentState::Sleep {
            self.control.report(AgentState::Work, None);
        }
        Directive::Continue
    }
}
