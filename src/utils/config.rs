// src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate:
//!
//! 1. built-in defaults (`Default` impls below)
//! 2. an optional file (`troupe.toml` in the working directory, or `--config`)
//! 3. environment variables, e.g. `TROUPE__WORKER__POLL_INTERVAL_SECS=2`

use crate::scheduling::budget::BudgetLimits;
use crate::utils::errors::{EngineError, Result};
use crate::utils::random::RandomSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const MINUTE: u64 = 60;
const HOUR: u64 = MINUTE * 60;
const DAY: u64 = HOUR * 24;
const WEEK: u64 = DAY * 7;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub budget: BudgetLimits,
    pub behavior: BehaviorConfig,
    pub worker: WorkerConfig,
    pub orchestrator: OrchestratorConfig,
    pub generator: GeneratorConfig,
    pub observability: ObservabilityConfig,

    /// Per-topic generator setup
    pub topics: HashMap<String, TopicConfig>,

    /// Known agents; starting an agent missing here is a configuration error
    pub agents: HashMap<String, AgentConfig>,
}

/// Where the shared SQLite files live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for storage
    pub base_dir: PathBuf,

    /// Agent/generator state database
    pub state_db: String,

    /// Work queue database
    pub queue_db: String,

    /// Action log database
    pub log_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(".troupe"),
            state_db: "state.db".to_string(),
            queue_db: "queue.db".to_string(),
            log_db: "actions.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn state_path(&self) -> PathBuf {
        self.base_dir.join(&self.state_db)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.base_dir.join(&self.queue_db)
    }

    pub fn log_path(&self) -> PathBuf {
        self.base_dir.join(&self.log_db)
    }
}

/// "Want" coefficients and pacing for optional actions
///
/// A coefficient is compared against a roll in `[0, want_max]`: the higher
/// the coefficient, the less often the agent wants to act. Negative
/// coefficients disable the action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub post_vote: i64,
    pub comment_vote: i64,
    pub want_max: i64,

    /// Upper bound of the random pause between actions
    pub max_wait_secs: u64,

    /// Neighborhood size around a commented item
    pub max_posts_near: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            post_vote: 65,
            comment_vote: 85,
            want_max: 100,
            max_wait_secs: 30,
            max_posts_near: 50,
        }
    }
}

impl BehaviorConfig {
    /// Roll against a want coefficient
    pub fn wants_to(&self, coefficient: i64, rng: &mut RandomSource) -> bool {
        coefficient >= 0 && rng.int_in(0, self.want_max) >= coefficient
    }
}

/// Worker process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable; empty means the current executable
    pub program: String,

    /// Arguments; `{agent}` is replaced by the agent name
    pub args: Vec<String>,

    /// How often a paused worker re-reads its state
    pub poll_interval_secs: u64,

    /// TTL of the worker's pid heartbeat
    pub heartbeat_ttl_secs: u64,

    /// Registered actions per work cycle before the agent sleeps
    pub actions_per_cycle: u64,

    pub min_cycle_sleep_secs: u64,
    pub max_cycle_sleep_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: vec!["worker".to_string(), "{agent}".to_string()],
            poll_interval_secs: 5,
            heartbeat_ttl_secs: MINUTE,
            actions_per_cycle: 100,
            min_cycle_sleep_secs: 6 * HOUR,
            max_cycle_sleep_secs: 12 * HOUR,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// TTL of a SUSPEND entry; on expiry the agent reads as STOP
    pub suspend_ttl_secs: u64,

    /// Grace period between SIGTERM and SIGKILL on stop
    pub kill_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            suspend_ttl_secs: WEEK,
            kill_grace_secs: 2,
        }
    }
}

impl OrchestratorConfig {
    pub fn suspend_ttl(&self) -> Duration {
        Duration::from_secs(self.suspend_ttl_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

/// Content generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub min_backoff_secs: u64,
    pub max_backoff_secs: u64,

    /// Generators used for topics without their own configuration
    pub default_generators: Vec<String>,

    /// Directory holding `<topic>.jsonl` feeds for the feed source
    pub feed_dir: PathBuf,

    /// How long an agent's need for a lane waits for a generator
    pub need_ttl_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_backoff_secs: 12 * MINUTE,
            max_backoff_secs: HOUR,
            default_generators: vec!["feed".to_string()],
            feed_dir: PathBuf::from("feeds"),
            need_ttl_secs: HOUR,
        }
    }
}

impl GeneratorConfig {
    pub fn need_ttl(&self) -> Duration {
        Duration::from_secs(self.need_ttl_secs)
    }
}

/// Logging and metrics output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `pretty` or `json`
    pub log_format: String,

    /// Prometheus listener, e.g. `127.0.0.1:9184`; disabled when unset
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: "pretty".to_string(),
            metrics_addr: None,
        }
    }
}

/// Generators attached to one topic
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub generators: Vec<String>,
    pub keywords: Vec<String>,

    /// Feed file for the feed source; defaults to `<feed_dir>/<topic>.jsonl`
    pub feed: Option<PathBuf>,
}

/// One agent's setup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Topics the agent reads and produces into
    pub topics: Vec<String>,

    /// Flat category name -> percentage overrides
    pub budget: HashMap<String, i64>,

    /// Behavior override; falls back to the global behavior
    pub behavior: Option<BehaviorConfig>,
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, requiring `path` when given
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("troupe").required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("TROUPE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;

        debug!("Loaded configuration for {} agents", config.agents.len());
        Ok(config)
    }

    /// Check ranges and required values
    pub fn validate(&self) -> Result<()> {
        self.budget.validate()?;

        if self.worker.args.is_empty() && self.worker.program.is_empty() {
            return Err(EngineError::ConfigError(
                "worker.args must not be empty when worker.program is unset".into(),
            ));
        }
        if self.worker.min_cycle_sleep_secs > self.worker.max_cycle_sleep_secs {
            return Err(EngineError::ConfigError(format!(
                "worker cycle sleep range is inverted: {} > {}",
                self.worker.min_cycle_sleep_secs, self.worker.max_cycle_sleep_secs
            )));
        }
        if self.generator.min_backoff_secs > self.generator.max_backoff_secs {
            return Err(EngineError::ConfigError(format!(
                "generator backoff range is inverted: {} > {}",
                self.generator.min_backoff_secs, self.generator.max_backoff_secs
            )));
        }
        if self.worker.heartbeat_ttl_secs <= self.worker.poll_interval_secs {
            return Err(EngineError::ConfigError(
                "worker.heartbeat_ttl_secs must exceed worker.poll_interval_secs".into(),
            ));
        }

        Ok(())
    }

    /// Configuration of a known agent
    pub fn agent(&self, name: &str) -> Result<&AgentConfig> {
        self.agents
            .get(name)
            .ok_or_else(|| EngineError::ConfigError(format!("Unknown agent '{}'", name)))
    }

    /// Behavior for an agent, falling back to the global one
    pub fn behavior_for(&self, name: &str) -> BehaviorConfig {
        self.agents
            .get(name)
            .and_then(|agent| agent.behavior.clone())
            .unwrap_or_else(|| self.behavior.clone())
    }

    /// Generator names and keywords for a topic
    pub fn topic(&self, topic: &str) -> TopicConfig {
        self.topics.get(topic).cloned().unwrap_or_else(|| TopicConfig {
            generators: self.generator.default_generators.clone(),
            ..Default::default()
        })
    }

    /// Feed file backing a topic
    pub fn feed_path(&self, topic: &str) -> PathBuf {
        self.topics
            .get(topic)
            .and_then(|t| t.feed.clone())
            .unwrap_or_else(|| self.generator.feed_dir.join(format!("{}.jsonl", topic)))
    }
}
