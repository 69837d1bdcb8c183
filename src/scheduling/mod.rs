// src/scheduling/mod.rs
//! Per-agent action scheduling
//!
//! - **Budget**: categories, per-cycle budget draw and the admission test
//! - **Sampler**: bounded random neighborhoods around a target item
//!
//! Both are synchronous and never block; the worker calls them before every
//! action.

pub mod budget;
pub mod sampler;

pub use budget::{ActionBudgetScheduler, ActionCategory, Budget, BudgetLimits};
pub use sampler::{pick_near, sample_neighborhood, Neighborhood};
