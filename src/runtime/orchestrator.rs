// src/runtime/orchestrator.rs
//! Process orchestrator: start, suspend, stop and query agent workers
//!
//! # State machine
//!
//! ```text
//!            start                 suspend (TTL)
//!   STOP ───────────▶ WORK ─────────────────────▶ SUSPEND
//!    ▲                 │  ▲                          │
//!    │      stop       │  └────────── start ─────────┤
//!    └─────────────────┘                             │
//!    ▲            stop / TTL expiry                  │
//!    └───────────────────────────────────────────────┘
//! ```
//!
//! A worker is "live" when the pid under `worker:<agent>` is running and its
//! command line names the agent, or, failing that, when a process launched
//! with the agent's worker arguments is running. A live worker is never spawned twice; a
//! start against it only rewrites the state. Two orchestrators racing on the
//! same agent can still both spawn: there is no distributed lock.

use crate::runtime::process_manager::ProcessManager;
use crate::state::store::{read_state, state_key, worker_key, write_state, AgentState, StateStore};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What `start` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new worker process was spawned
    Started(u32),

    /// A live worker already runs in WORK or SLEEP
    AlreadyRunning(u32),

    /// A live worker was found in SUSPEND/STOP and set back to WORK
    Resumed(u32),
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            StartOutcome::Started(pid)
            | StartOutcome::AlreadyRunning(pid)
            | StartOutcome::Resumed(pid) => *pid,
        }
    }
}

/// Controls the lifecycle of agent worker processes
pub struct ProcessOrchestrator {
    store: Arc<dyn StateStore>,
    processes: ProcessManager,
    config: Arc<EngineConfig>,

    /// Serializes start/stop per agent within this process
    locks: DashMap<String, Arc<Mutex<()>>>,

    suspend_ttl: Duration,
}

impl ProcessOrchestrator {
    pub fn new(store: Arc<dyn StateStore>, processes: ProcessManager, config: Arc<EngineConfig>) -> Self {
        let suspend_ttl = config.orchestrator.suspend_ttl();
        Self {
            store,
            processes,
            config,
            locks: DashMap::new(),
            suspend_ttl,
        }
    }

    /// Override the SUSPEND TTL
    pub fn with_suspend_ttl(mut self, ttl: Duration) -> Self {
        self.suspend_ttl = ttl;
        self
    }

    fn lock_for(&self, agent: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reject agents that cannot run; they never reach WORK
    fn validate_agent(&self, agent: &str) -> Result<()> {
        if agent.is_empty() || agent.chars().any(|c| c.is_whitespace() || c == '\0') {
            return Err(EngineError::ConfigError(format!(
                "Invalid agent name '{}'",
                agent
            )));
        }

        let agent_config = self.config.agent(agent)?;

        if agent_config.topics.is_empty() {
            return Err(EngineError::ConfigError(format!(
                "Agent '{}' has no topics configured",
                agent
            )));
        }

        if let Some((category, pct)) = agent_config.budget.iter().find(|(_, pct)| **pct > 100) {
            return Err(EngineError::ConfigError(format!(
                "Agent '{}' budget for '{}' exceeds 100%: {}",
                agent, category, pct
            )));
        }

        Ok(())
    }

    /// Pid of the agent's live worker, if any
    ///
    /// The heartbeat key is consulted first. When it is missing, stale or
    /// unreadable the process table is scanned, so a worker whose key
    /// expired is still found.
    pub fn live_worker(&self, agent: &str) -> Option<u32> {
        if let Some(pid) = self.recorded_worker(agent) {
            return Some(pid);
        }
        self.processes.find_worker(agent)
    }

    fn recorded_worker(&self, agent: &str) -> Option<u32> {
        let raw = match self.store.get(&worker_key(agent)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cannot read worker pid for {}: {}", agent, e);
                return None;
            }
        };

        let pid: u32 = match raw.parse() {
            Ok(pid) => pid,
            Err(_) => {
                warn!("Malformed worker pid for {}: {:?}", agent, raw);
                return None;
            }
        };

        if self.processes.matches_worker(pid, agent) {
            Some(pid)
        } else {
            debug!("Recorded PID {} for {} is not a live worker", pid, agent);
            None
        }
    }

    /// Start the agent's worker unless one is already live
    pub async fn start(&self, agent: &str) -> Result<StartOutcome> {
        self.validate_agent(agent)?;

        let lock = self.lock_for(agent);
        let _guard = lock.lock().await;

        let state = self.get_state(agent);

        if let Some(pid) = self.live_worker(agent) {
            if state.is_active() {
                debug!("Agent {} already running as PID {} ({})", agent, pid, state);
                return Ok(StartOutcome::AlreadyRunning(pid));
            }

            write_state(self.store.as_ref(), &state_key(agent), AgentState::Work, None)?;
            info!("Agent {} resumed (PID {}, was {})", agent, pid, state);
            return Ok(StartOutcome::Resumed(pid));
        }

        // WORK goes in first: a fresh worker that reads STOP exits immediately
        write_state(self.store.as_ref(), &state_key(agent), AgentState::Work, None)?;

        let pid = match self.processes.spawn_worker(agent).await {
            Ok(pid) => pid,
            Err(e) => {
                if let Err(reset) = self.store.delete(&state_key(agent)) {
                    warn!("Failed to reset state of {} after spawn failure: {}", agent, reset);
                }
                return Err(e);
            }
        };

        self.store.set(
            &worker_key(agent),
            &pid.to_string(),
            Some(self.config.worker.heartbeat_ttl()),
        )?;

        metrics::counter!("troupe_workers_spawned_total").increment(1);
        info!("Agent {} started as PID {}", agent, pid);
        Ok(StartOutcome::Started(pid))
    }

    /// Ask the agent to pause; advisory, expires after the SUSPEND TTL
    pub async fn suspend(&self, agent: &str) -> Result<()> {
        write_state(
            self.store.as_ref(),
            &state_key(agent),
            AgentState::Suspend,
            Some(self.suspend_ttl),
        )?;
        info!("Agent {} suspended for {:?}", agent, self.suspend_ttl);
        Ok(())
    }

    /// Stop the agent and terminate its worker if one can be found
    pub async fn stop(&self, agent: &str) -> Result<()> {
        let lock = self.lock_for(agent);
        let _guard = lock.lock().await;

        write_state(self.store.as_ref(), &state_key(agent), AgentState::Stop, None)?;

        if let Some(pid) = self.live_worker(agent) {
            if let Err(e) = self
                .processes
                .kill(pid, self.config.orchestrator.kill_grace())
                .await
            {
                warn!("Failed to terminate worker {} of {}: {}", pid, agent, e);
            }
        }

        if let Err(e) = self.store.delete(&worker_key(agent)) {
            warn!("Failed to clear worker pid of {}: {}", agent, e);
        }

        info!("Agent {} stopped", agent);
        Ok(())
    }

    /// Last known state; STOP when absent, expired or unreadable
    pub fn get_state(&self, agent: &str) -> AgentState {
        read_state(self.store.as_ref(), &state_key(agent))
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::runtime::process_manager::{WorkerCommand, AGENT_PLACEHOLDER};
    use crate::state::store::{MemoryStateStore, UnreachableStore};
    use crate::utils::config::AgentConfig;

    fn config() -> Arc<EngineConfig> {
        let mut config = EngineConfig::default();
        for name in ["alice", "bob", "carol", "dave", "erin"] {
            config.agents.insert(
                name.to_string(),
                AgentConfig {
                    topics: vec!["rust".to_string()],
                    ..Default::default()
                },
            );
        }
        config.agents.insert("lonely".to_string(), AgentConfig::default());
        config.orchestrator.kill_grace_secs = 1;
        Arc::new(config)
    }

    fn orchestrator(store: Arc<dyn StateStore>) -> ProcessOrchestrator {
        let processes = ProcessManager::new(WorkerCommand {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "while :; do sleep 1; done".to_string(),
                AGENT_PLACEHOLDER.to_string(),
            ],
            env_vars: vec![],
        });
        ProcessOrchestrator::new(store, processes, config())
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let orchestrator = orchestrator(store);

        let first = orchestrator.start("alice").await.unwrap();
        assert!(matches!(first, StartOutcome::Started(_)));
        assert_eq!(orchestrator.get_state("alice"), AgentState::Work);

        let second = orchestrator.start("alice").await.unwrap();
        assert_eq!(second, StartOutcome::AlreadyRunning(first.pid()));

        orchestrator.stop("alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_suspend_then_resume() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let orchestrator = orchestrator(store);

        let pid = orchestrator.start("bob").await.unwrap().pid();
        orchestrator.suspend("bob").await.unwrap();
        assert_eq!(orchestrator.get_state("bob"), AgentState::Suspend);

        let resumed = orchestrator.start("bob").await.unwrap();
        assert_eq!(resumed, StartOutcome::Resumed(pid));
        assert_eq!(orchestrator.get_state("bob"), AgentState::Work);

        orchestrator.stop("bob").await.unwrap();
    }

    #[tokio::test]
    async fn test_suspend_expires_to_stop() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let orchestrator = orchestrator(store).with_suspend_ttl(Duration::from_millis(50));

        orchestrator.suspend("carol").await.unwrap();
        assert_eq!(orchestrator.get_state("carol"), AgentState::Suspend);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(orchestrator.get_state("carol"), AgentState::Stop);
    }

    #[tokio::test]
    async fn test_stop_terminates_worker() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let orchestrator = orchestrator(store.clone());

        let pid = orchestrator.start("dave").await.unwrap().pid();
        assert_eq!(orchestrator.live_worker("dave"), Some(pid));

        orchestrator.stop("dave").await.unwrap();
        assert_eq!(orchestrator.get_state("dave"), AgentState::Stop);
        assert_eq!(orchestrator.live_worker("dave"), None);
        assert_eq!(store.get(&worker_key("dave")).unwrap(), None);

        // stopping an already stopped agent is fine
        orchestrator.stop("dave").await.unwrap();
    }

    #[tokio::test]
    async fn test_configuration_errors_never_reach_work() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let orchestrator = orchestrator(store);

        let err = orchestrator.start("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigError(_)));
        assert_eq!(orchestrator.get_state("ghost"), AgentState::Stop);

        let err = orchestrator.start("lonely").await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigError(_)));
        assert_eq!(orchestrator.get_state("lonely"), AgentState::Stop);

        assert!(orchestrator.start("two words").await.is_err());
    }

    #[tokio::test]
    async fn test_stale_pid_is_ignored() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let orchestrator = orchestrator(store.clone());

        // our own pid is alive but its command line does not name the agent
        store
            .set(&worker_key("carol"), &std::process::id().to_string(), None)
            .unwrap();
        assert_eq!(orchestrator.live_worker("carol"), None);

        store.set(&worker_key("carol"), "not-a-pid", None).unwrap();
        assert_eq!(orchestrator.live_worker("carol"), None);
    }

    #[tokio::test]
    async fn test_unreachable_store_reports_stop() {
        let store: Arc<dyn StateStore> = Arc::new(UnreachableStore::new("database is locked"));
        let orchestrator = orchestrator(store);

        assert_eq!(orchestrator.get_state("carol"), AgentState::Stop);
        assert_eq!(orchestrator.live_worker("carol"), None);
        assert!(matches!(
            orchestrator.suspend("carol").await,
            Err(EngineError::StorageFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_heartbeat_does_not_spawn_twice() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let orchestrator = orchestrator(store.clone());

        let pid = orchestrator.start("erin").await.unwrap().pid();
        // the heartbeat key lapses while the worker is busy
        store.delete(&worker_key("erin")).unwrap();

        assert_eq!(orchestrator.live_worker("erin"), Some(pid));
        assert_eq!(
            orchestrator.start("erin").await.unwrap(),
            StartOutcome::AlreadyRunning(pid)
        );

        orchestrator.stop("erin").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(orchestrator.live_worker("erin"), None);
    }
}
