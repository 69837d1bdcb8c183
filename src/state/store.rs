// src/state/store.rs
//! Expiring key-value state
//!
//! The store is the single source of truth for "is this agent alive, and in
//! what phase". Writers race freely; the last write wins.

use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Lifecycle phase of an agent (or a generator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Work,
    Sleep,
    Suspend,
    Stop,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Work => "work",
            AgentState::Sleep => "sleep",
            AgentState::Suspend => "suspend",
            AgentState::Stop => "stop",
        }
    }

    /// WORK and SLEEP both mean a worker is expected to be alive
    pub fn is_active(&self) -> bool {
        matches!(self, AgentState::Work | AgentState::Sleep)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "work" => Ok(AgentState::Work),
            "sleep" => Ok(AgentState::Sleep),
            "suspend" => Ok(AgentState::Suspend),
            "stop" => Ok(AgentState::Stop),
            other => Err(EngineError::StorageFailed(format!(
                "Unknown state value '{}'",
                other
            ))),
        }
    }
}

/// Key of an agent's lifecycle state
pub fn state_key(agent: &str) -> String {
    format!("state:{}", agent)
}

/// Key of an agent's worker pid heartbeat
pub fn worker_key(agent: &str) -> String {
    format!("worker:{}", agent)
}

/// Key of a topic generator's state
pub fn generator_key(topic: &str) -> String {
    format!("generator:{}", topic)
}

/// Key of a pending need for a queue lane
pub fn need_key(lane: &str) -> String {
    format!("need:{}", lane)
}

/// Minimal expiring key-value store
///
/// Each key carries its own optional TTL; an expired key reads as absent.
pub trait StateStore: Send + Sync {
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Read a state, degrading to STOP on absence, expiry or any failure
pub fn read_state(store: &dyn StateStore, key: &str) -> AgentState {
    match store.get(key) {
        Ok(Some(raw)) => raw.parse().unwrap_or_else(|e| {
            warn!("Unreadable state under {}: {}", key, e);
            AgentState::Stop
        }),
        Ok(None) => AgentState::Stop,
        Err(e) => {
            warn!("State store unavailable reading {}: {}", key, e);
            AgentState::Stop
        }
    }
}

/// Write a state value
pub fn write_state(
    store: &dyn StateStore,
    key: &str,
    state: AgentState,
    ttl: Option<Duration>,
) -> Result<()> {
    store.set(key, state.as_str(), ttl)
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-process store; expiry is checked lazily on read
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        trace!("set {} = {} (ttl {:?})", key, value, ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        // expired: drop it unless a writer replaced it meanwhile
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Stand-in for a store that could not be opened
///
/// Every call fails with `StorageFailed`, so readers going through
/// [`read_state`] see STOP.
#[derive(Debug, Clone)]
pub struct UnreachableStore {
    reason: String,
}

impl UnreachableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn failure(&self) -> EngineError {
        EngineError::StorageFailed(self.reason.clone())
    }
}

impl StateStore for UnreachableStore {
    fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<()> {
        Err(self.failure())
    }

    fn get(&self, _: &str) -> Result<Option<String>> {
        Err(self.failure())
    }

    fn delete(&self, _: &str) -> Result<()> {
        Err(self.failure())
    }
}
