//! Logger setup for binaries and tests embedding the engine
//!
//! The library itself only talks to the `log` facade. This wires an
//! `env_logger` backend from [`LoggingConfig`]; `RUST_LOG` still overrides
//! the configured level.

use log::LevelFilter;
use std::fs::OpenOptions;

use crate::config::LoggingConfig;
use crate::errors::AgentError;

/// Installs the global logger. Returns `Ok(false)` when a logger was
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, AgentError> {
    let level: LevelFilter = config
        .level
        .parse()
        .map_err(|_| AgentError::ConfigError(format!("Unknown log level '{}'", config.level)))?;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    if let Some(path) = &config.file {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                AgentError::ConfigError(format!(
                    "Failed to open log file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    Ok(builder.try_init().is_ok())
}
