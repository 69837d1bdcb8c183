// src/queue/mod.rs
//! Producer/consumer work queue
//!
//! - **Work Item**: the queued unit and its identity hash
//! - **Backend**: `QueueBackend` with in-memory and SQLite implementations
//! - **Need Bus**: signals between producers and agents, optionally carried
//!   across processes through the state store
//! - **Work Queue**: the facade generators and workers talk to
//!
//! # Lanes
//!
//! ```text
//! <topic>            post work, produced into the topic (or its route)
//! <topic>.comments   comment work, targeting an item of the topic
//! ```

pub mod backend;
pub mod need;
pub mod sqlite;
pub mod work_item;
pub mod work_queue;

pub use backend::{MemoryQueue, QueueBackend};
pub use need::{NeedBus, NeedSignal};
pub use sqlite::SqliteQueue;
pub use work_item::{comment_lane, WorkItem};
pub use work_queue::WorkQueue;
