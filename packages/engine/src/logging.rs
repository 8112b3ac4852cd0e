//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The level comes from the `JOB_ENGINE_LOG` environment variable (e.g.
//! "info", "debug") and defaults to `info`. Logs go to stderr.

use tracing_subscriber::fmt;

/// Error returned when a global subscriber is already installed.
pub type LoggingError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Install the global logging subscriber.
///
/// Fails if a subscriber was already installed.
pub fn init_logging() -> Result<(), LoggingError> {
    fmt()
        .with_max_level(level_from_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
}

/// Install the subscriber unless one is already present.
///
/// Output is captured by the test harness.
pub fn try_init_logging() {
    let _ = fmt()
        .with_max_level(level_from_env())
        .with_test_writer()
        .try_init();
}

fn level_from_env() -> tracing::Level {
    std::env::var("JOB_ENGINE_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .unwrap_or(tracing::Level::INFO)
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
