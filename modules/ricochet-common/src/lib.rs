pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{load_config, EngineConfig};
pub use error::ConfigError;
pub use telemetry::init_tracing;
