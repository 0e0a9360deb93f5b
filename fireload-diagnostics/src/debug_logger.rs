//! Structured logging setup

use fireload_core::LoadError;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the default filter
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

/// Build the filter: `RUST_LOG` when set and valid, `default_level` otherwise
pub fn log_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the global tracing subscriber.
///
/// Fails if a subscriber is already installed, e.g. by a test harness.
pub fn init_logging(default_level: &str) -> Result<(), LoadError> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(default_level))
        .with_target(false)
        .try_init()
        .map_err(|e| LoadError::Internal {
            reason: format!("logging already initialized: {}", e),
        })
}
