// src/lib.rs
//! Troupe Engine Library
//!
//! Runs a set of autonomous agents, each in its own worker process, that
//! act on a content platform under a per-agent action budget.
//!
//! # Architecture
//!
//! - **scheduling**: action categories, budget draw, admission test and
//!   neighborhood sampling
//! - **state**: the shared key/value store carrying agent and generator state
//! - **runtime**: worker processes, the orchestrator and the agent worker loop
//! - **queue**: lanes of work items between generators and agents
//! - **generation**: content sources merged into the queue
//! - **recording**: the action log
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration, errors and randomness

pub mod generation;
pub mod observability;
pub mod queue;
pub mod recording;
pub mod runtime;
pub mod scheduling;
pub mod state;
pub mod utils;

pub use queue::{WorkItem, WorkQueue};
pub use runtime::{AgentWorker, ProcessOrchestrator, StartOutcome};
pub use scheduling::{ActionBudgetScheduler, ActionCategory};
pub use state::{AgentState, StateStore};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
