// src/state/mod.rs
//! Agent lifecycle state
//!
//! - **Store**: the `StateStore` trait, `AgentState`, key helpers and the
//!   in-process `MemoryStateStore`
//! - **Sqlite**: `SqliteStateStore`, shared between orchestrator and worker
//!   processes
//!
//! # Keys
//!
//! ```text
//! state:<agent>       work | sleep | suspend | stop   (SUSPEND/SLEEP carry a TTL)
//! worker:<agent>      pid of the live worker          (heartbeat TTL)
//! generator:<topic>   work | sleep | suspend | stop
//! need:<lane>         set when an agent found the lane empty (TTL)
//! ```

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteStateStore;
pub use store::{
    generator_key, need_key, read_state, state_key, worker_key, write_state, AgentState,
    MemoryStateStore, StateStore, UnreachableStore,
};
