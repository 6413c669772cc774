//! Logging initialization.
//!
//! Thin wrapper over the observability package so every binary in the
//! workspace configures `tracing` the same way.

use observability::LogConfig;
use std::path::PathBuf;

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level`. `log_file` overrides the default
/// JSONL location. Set `PROFILE_SYNC_LOG_STDERR=0` to silence the stderr
/// mirror when the JSONL sink is enabled.
pub fn init_logging(service_name: &str, level: &str, log_file: Option<PathBuf>) {
    let also_stderr = std::env::var("PROFILE_SYNC_LOG_STDERR")
        .map(|raw| !matches!(raw.trim(), "0" | "false" | "off"))
        .unwrap_or(true);

    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).as_str().to_lowercase(),
        log_path: log_file,
        also_stderr,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
