//! # Pool Telemetry
//!
//! Structured logging for primary, relay and collector processes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pool_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("telemetry");
//!     // Logs are now emitted as pretty text or JSON.
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RP_SERVICE_NAME` | `relay-pool` | Service name attached to logs |
//! | `RP_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `RP_JSON_LOGS` | `false` (`true` in containers) | JSON formatted logs |
//! | `RP_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
mod tracing_setup;

pub use config::TelemetryConfig;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to install subscriber: {0}")]
    SubscriberInit(String),
}

/// Install the global `tracing` subscriber.
///
/// Returns a guard to hold for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    tracing_setup::init_tracing(&config)?;
    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Keeps telemetry active; logs a final line on drop.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Telemetry shutting down");
    }
}
