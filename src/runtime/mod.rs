// src/runtime/mod.rs
//! Agent runtime
//!
//! - **Process Manager**: spawning, probing and killing worker processes
//! - **Orchestrator**: start/suspend/stop through the state store
//! - **Worker**: the action loop inside a worker process
//! - **Executor**: the seam to the platform actions are performed on
//!
//! # Architecture
//!
//! ```text
//!   troupe start alice                       troupe worker alice
//!  ┌──────────────────────┐   spawn      ┌──────────────────────────┐
//!  │ ProcessOrchestrator  │ ───────────▶ │ AgentWorker              │
//!  └──────────┬───────────┘              │  checkpoint ─ budget ─┐  │
//!             │ state:alice              │  executor ◀───────────┘  │
//!             ▼                          └──────┬───────────────────┘
//!  ┌──────────────────────┐  state + heartbeat  │
//!  │      StateStore      │ ◀───────────────────┘
//!  └──────────────────────┘
//! ```

pub mod executor;
pub mod orchestrator;
pub mod process_manager;
pub mod worker;

pub use executor::{ActionExecutor, DryRunExecutor, PlannedAction};
pub use orchestrator::{ProcessOrchestrator, StartOutcome};
pub use process_manager::{ProcessManager, WorkerCommand};
pub use worker::{AgentWorker, Directive, Heartbeat, WorkerControl};
