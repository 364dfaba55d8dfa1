use std::env;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_LOG_FILTER: &str = "ricochet=info";
const DEFAULT_DEMO_TICK_MS: u64 = 1_000;

/// Runtime configuration for the engine and the binaries built on it.
///
/// Every field has a default, so an empty environment and an empty TOML file
/// are both valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directive appended to `RUST_LOG` when building the tracing filter.
    pub log_filter: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
    /// Install the tracing middleware that logs every dispatched event.
    pub trace_dispatch: bool,
    /// Period of the demo's timer epic.
    pub demo_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_json: false,
            trace_dispatch: false,
            demo_tick_ms: DEFAULT_DEMO_TICK_MS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing keys keep their
    /// defaults; present but unparsable values are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            log_filter: lookup("RICOCHET_LOG").unwrap_or(defaults.log_filter),
            log_json: parse_or("RICOCHET_LOG_JSON", &lookup, defaults.log_json)?,
            trace_dispatch: parse_or("RICOCHET_TRACE_DISPATCH", &lookup, defaults.trace_dispatch)?,
            demo_tick_ms: parse_or("RICOCHET_DEMO_TICK_MS", &lookup, defaults.demo_tick_ms)?,
        })
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  RICOCHET_LOG: {}", self.log_filter);
        tracing::info!("  RICOCHET_LOG_JSON: {}", self.log_json);
        tracing::info!("  RICOCHET_TRACE_DISPATCH: {}", self.trace_dispatch);
        tracing::info!("  RICOCHET_DEMO_TICK_MS: {}", self.demo_tick_ms);
    }
}

fn parse_or<T>(
    key: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
