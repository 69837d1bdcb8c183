// src/utils/errors.rs
//! Engine error types
//!
//! Every fallible library operation returns [`Result`]. The binary wraps
//! these in `anyhow` at the edge.

use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the scheduling core
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or missing configuration (fatal at agent start)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A worker process could not be spawned
    #[error("Process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    /// Generic runtime failure (signals, process inspection)
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// State store or action log backend failure
    #[error("Storage failed: {0}")]
    StorageFailed(String),

    /// Work queue backend unreachable; the item was not queued or popped
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// A single action failed in the external executor
    #[error("Action execution failed: {0}")]
    ExecutionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// True for failures of a shared backend (store, queue, log)
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            EngineError::StorageFailed(_) | EngineError::QueueUnavailable(_)
        )
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        EngineError::ConfigError(e.to_string())
    }
}
