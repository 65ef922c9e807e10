//! Structured logging initialization.
//!
//! Leveled, structured `tracing` events rather than ad hoc prints. Call
//! [`init`] once at process start; every other module instruments its own
//! operations with `tracing::{info,debug,warn}!` and leaves formatting to
//! the subscriber configured here.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, for a TTY.
    #[default]
    Text,
    /// One JSON object per line, for pipelines and log aggregators.
    Json,
}

/// Configuration for [`init`].
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"fuzzer_core=debug,reqwest=warn"`.
    /// Falls back to the `RUST_LOG` environment variable, then `"info"`.
    pub filter: Option<String>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            format: LogFormat::default(),
        }
    }
}

/// Initialize the global `tracing` subscriber. Idempotent: a second call is
/// a no-op (subsequent `try_init` failures are swallowed), so test binaries
/// that each spin up their own job manager can call this freely.
pub fn init(config: LoggingConfig) {
    let filter_str = config
        .filter
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    let env_filter = EnvFilter::try_new(&filter_str)
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_line_number(true);
            registry.with(layer).try_init()
        }
        LogFormat::Text => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_line_number(false);
            registry.with(layer).try_init()
        }
    };

    // A second init in the same process (e.g. in tests) fails harmlessly.
    let _ = result;
}
