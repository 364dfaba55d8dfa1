//! Tracing bootstrap shared by the binaries.

use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::error::ConfigError;

/// Build the filter: `RUST_LOG` first, then the configured directive on top.
pub fn env_filter(config: &EngineConfig) -> Result<EnvFilter, ConfigError> {
    let directive = config
        .log_filter
        .parse()
        .map_err(|e| ConfigError::LogFilter(format!("{}: {e}", config.log_filter)))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Install the global subscriber. Call once, at the top of `main`.
pub fn init_tracing(config: &EngineConfig) -> Result<(), ConfigError> {
    let filter = env_filter(config)?;
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
