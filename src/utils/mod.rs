// src/utils/mod.rs
//! Common utilities: configuration, errors and the seedable random source

pub mod config;
pub mod errors;
pub mod random;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
pub use random::RandomSource;
