//! Configuration module for the directive engine
//!
//! Configuration is read from YAML. Sections mirror the runtime pieces they
//! feed: the model endpoint, the default retry policy, the batch caller, the
//! directive loop and logging.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::AgentError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<LoomConfig, AgentError> {
    ConfigLoader::from_file(path).await
}

/// Validate a configuration
pub fn validate_config(config: &LoomConfig) -> Result<(), AgentError> {
    config.validate()
}
