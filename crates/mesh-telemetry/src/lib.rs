//! # Mesh Telemetry
//!
//! Structured logging for HiveMesh nodes, built on `tracing` with an
//! env-filtered subscriber. Services log with structured fields
//! (`tracing::debug!/info!/warn!`); this crate only installs the sink.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HM_LOG_LEVEL` or `RUST_LOG` | `info` | Log level filter |
//! | `HM_JSON_LOGS` | `false` | JSON formatted output |

use std::env;

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install the tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped onto every log line.
    pub service_name: String,
    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "hivemesh".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env::var("HM_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: env::var("HM_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            json_logs: env::var("HM_JSON_LOGS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.json_logs),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at process start; a second call reports an error instead of
/// panicking so tests can race on it harmlessly.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}
