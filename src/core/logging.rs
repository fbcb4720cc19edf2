//! Logging setup
//!
//! `RUST_LOG` wins over the configured level. Safe to call more than once.

use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::LoggingConfig;

/// Install the global tracing subscriber
pub fn init(config: &LoggingConfig) {
    let default_level = if config.debug { "debug" } else { config.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries the invocation result.
    let installed = if config.json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .is_ok()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(json = config.json, "logging initialised");
    }
}
