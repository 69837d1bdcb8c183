// src/recording/mod.rs
//! Action recording
//!
//! Workers hand every registered action to an [`ActionSink`]. A failing sink
//! never blocks the worker: the error is logged and the action still counts.

pub mod action_log;

pub use action_log::{ActionRecord, ActionSink, AgentStats, MemoryActionLog, SqliteActionLog};
