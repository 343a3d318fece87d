//! Logging setup: `tracing` with an env-overridable filter and an optional
//! JSON console layer for machine-readable daemon logs.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether to output JSON-structured logs to console.
    pub json_logs: bool,
    /// Log level filter (e.g., "mainline=info,warn"), overridden by
    /// `RUST_LOG` when set.
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_filter: "mainline=info".into(),
        }
    }
}

/// Initialize the global subscriber. Call once at process start.
pub fn init_telemetry(config: &TelemetryConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    // Boxed to erase the json vs plain type difference.
    let console_layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::NONE)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::NONE)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();
}
