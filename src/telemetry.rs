//! Logging bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber. Safe to call more than once; a
/// subscriber that is already installed wins.
pub fn init(config: &LoggingConfig) {
    let _ = try_init(config);
}

/// Install the global tracing subscriber, reporting whether another
/// subscriber was already installed.
pub fn try_init(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(Into::into)
}
