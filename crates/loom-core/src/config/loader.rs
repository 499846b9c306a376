//! Configuration loader for YAML files and environment resolution

use crate::config::types::*;
use crate::errors::AgentError;
use std::env;
use std::path::Path;
use tokio::fs;

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<LoomConfig, AgentError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            AgentError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content).await
    }

    /// Load configuration from a YAML string
    pub async fn from_str(content: &str) -> Result<LoomConfig, AgentError> {
        // An empty document deserialises as unit, not as an empty mapping.
        let mut config: LoomConfig = if content.trim().is_empty() {
            LoomConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| AgentError::ConfigError(format!("Failed to parse YAML config: {}", e)))?
        };

        Self::resolve_environment(&mut config);

        config.validate()?;

        Ok(config)
    }

    /// Resolve the model API key from the environment
    fn resolve_environment(config: &mut LoomConfig) {
        let model = &mut config.model;

        if let Some(env_var) = &model.api_key_env {
            match env::var(env_var) {
                Ok(api_key) => model.api_key = Some(api_key),
                Err(_) => log::warn!("Environment variable {} is not set", env_var),
            }
        }

        if model.api_key.is_none() && model.api_key_env.is_none() {
            if let Ok(api_key) = env::var("OPENAI_API_KEY") {
                model.api_key = Some(api_key);
            }
        }
    }
}
