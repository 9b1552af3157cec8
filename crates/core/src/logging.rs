//! Structured logging initialization.
//!
//! `RUST_LOG` wins over the configured level when set, so operators can raise
//! verbosity for a single run without touching the settings file.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, Settings};

fn filter(default_level: &str) -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok(), default_level)
}

/// Unset, blank or unparsable `RUST_LOG` falls back to `default_level`.
fn filter_from(env: Option<String>, default_level: &str) -> EnvFilter {
    env.filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}

/// Initialize human-readable logging.
///
/// # Example
/// ```no_run
/// use iotid_core::logging;
///
/// logging::init("info");
/// tracing::info!("identity service started");
/// ```
pub fn init(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize JSON logging for log aggregation.
pub fn init_json(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize logging according to `log_level` and `log_format`.
pub fn init_from_settings(settings: &Settings) {
    match settings.log_format {
        LogFormat::Pretty => init(&settings.log_level),
        LogFormat::Json => init_json(&settings.log_level),
    }
}
