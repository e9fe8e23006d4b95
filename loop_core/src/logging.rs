//! Logging infrastructure for the dosing engine.
//!
//! The engine only emits `tracing` events; binaries and tests decide where
//! they go. Output is written to stderr so JSON on stdout stays parseable.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging at INFO, overridable with RUST_LOG
pub fn init() {
    init_with_level("info")
}

/// Initialize logging from the `[logging]` section of the config file
pub fn init_from_config(config: &LoggingConfig) {
    init_with_level(&config.level)
}

/// Initialize logging with a default level or filter directive
///
/// `default_level` accepts anything `EnvFilter` parses, e.g. `warn` or
/// `loop_core::retrospective=debug`. RUST_LOG wins when set. An unparseable
/// directive falls back to INFO.
pub fn init_with_level(default_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("loop_core=debug"))
        .try_init();
}
