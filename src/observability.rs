// src/observability.rs
//! Logging and metrics setup
//!
//! Logs go to stderr so command output on stdout stays parseable. The
//! filter honors `RUST_LOG` (default `info`); `TROUPE_LOG_FORMAT=json`
//! overrides the configured format.

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Environment override first, then the configured value
    pub fn resolve(config: &ObservabilityConfig) -> Self {
        let raw = std::env::var("TROUPE_LOG_FORMAT").unwrap_or_else(|_| config.log_format.clone());
        Self::parse(&raw)
    }

    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Install the global tracing subscriber
///
/// Fails when a subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match LogFormat::resolve(config) {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| EngineError::RuntimeError(format!("Failed to initialize tracing: {}", e)))
}

/// Start the Prometheus exporter when an address is configured
pub fn init_metrics(addr: Option<&str>) -> Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => return Ok(()),
    };

    let socket: SocketAddr = addr
        .parse()
        .map_err(|e| EngineError::ConfigError(format!("Invalid metrics address '{}': {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(socket)
        .install()
        .map_err(|e| EngineError::RuntimeError(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Metrics exporter listening on {}", socket);
    Ok(())
}
