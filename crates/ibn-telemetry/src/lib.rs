//! # IBN Telemetry
//!
//! Structured logging for IBN services, with optional span export.
//!
//! ```text
//! service process
//!   │  tracing::info!/span!
//!   ▼
//! registry ─► fmt layer (pretty | JSON) ─► stdout
//!          └► OpenTelemetry layer ───────► OTLP collector   [feature = "otlp"]
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ibn_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env("ibn-fabric-gateway");
//!     let _guard = init_telemetry(&config).expect("telemetry");
//!     tracing::info!("gateway starting");
//! }
//! ```

mod config;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use tracing_setup::{build_filter, TracingGuard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },

    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("failed to initialize span exporter: {0}")]
    ExporterInit(String),
}

/// Keeps telemetry alive; flushes exported spans when dropped.
pub struct TelemetryGuard {
    service_name: String,
    _tracing: TracingGuard,
}

impl TelemetryGuard {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let tracing = tracing_setup::init_tracing(config)?;
    Ok(TelemetryGuard {
        service_name: config.service_name.clone(),
        _tracing: tracing,
    })
}
