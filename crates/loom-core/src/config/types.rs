//! Configuration type definitions for the directive engine
//!
//! Every section carries serde defaults so that an empty YAML document is a
//! valid configuration; files only spell out what they change.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::call::{MapCallConfig, RetryConfig};
use crate::errors::AgentError;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoomConfig {
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: MapCallConfig,
    #[serde(default)]
    pub directive: DirectiveSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    /// Base URL; requests go to `{endpoint}/v1/chat/completions`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Extra request fields passed through verbatim.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: None,
            headers: HashMap::new(),
            parameters: Map::new(),
        }
    }
}

impl ModelSettings {
    /// Request fields other than `messages`.
    pub fn request_config(&self) -> Map<String, Value> {
        let mut config = self.parameters.clone();
        config.insert("model".to_string(), Value::String(self.model.clone()));
        config.insert("temperature".to_string(), Value::from(self.temperature));
        if let Some(max_tokens) = self.max_tokens {
            config.insert("max_tokens".to_string(), Value::from(max_tokens));
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectiveSettings {
    /// Extension budget used when a form allows extension without a limit.
    #[serde(default = "default_max_extension")]
    pub max_extension: usize,
    #[serde(default = "default_true")]
    pub invoke_tools: bool,
    #[serde(default)]
    pub clear_messages: bool,
    #[serde(default)]
    pub system: Option<String>,
    /// Retry policy for every model call made by the directive loop.
    #[serde(default)]
    pub model_retry: RetryConfig,
}

impl Default for DirectiveSettings {
    fn default() -> Self {
        Self {
            max_extension: default_max_extension(),
            invoke_tools: default_true(),
            clear_messages: false,
            system: None,
            model_retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_endpoint() -> String { "https://api.openai.com".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_extension() -> usize { 3 }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }

fn validate_retry(section: &str, retry: &RetryConfig) -> Result<(), AgentError> {
    let durations = [("delay", retry.delay), ("retry_delay", retry.retry_delay)];
    for (name, value) in durations {
        if !value.is_finite() || value < 0.0 {
            return Err(AgentError::ConfigError(format!(
                "{}.{} must be a non-negative number of seconds",
                section, name
            )));
        }
    }
    if !retry.backoff_factor.is_finite() || retry.backoff_factor < 0.0 {
        return Err(AgentError::ConfigError(format!(
            "{}.backoff_factor must be a non-negative number",
            section
        )));
    }
    if let Some(timeout) = retry.timeout {
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(AgentError::ConfigError(format!(
                "{}.timeout must be greater than 0",
                section
            )));
        }
    }
    Ok(())
}

impl LoomConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.model.model.is_empty() {
            return Err(AgentError::ConfigError("Model name cannot be empty".to_string()));
        }

        if self.model.endpoint.is_empty() {
            return Err(AgentError::ConfigError("Model endpoint cannot be empty".to_string()));
        }

        validate_retry("retry", &self.retry)?;
        validate_retry("directive.model_retry", &self.directive.model_retry)?;

        if self.batch.batch_size == Some(0) {
            return Err(AgentError::ConfigError("batch.batch_size must be greater than 0".to_string()));
        }

        if self.batch.max_concurrent == Some(0) {
            return Err(AgentError::ConfigError(
                "batch.max_concurrent must be greater than 0".to_string(),
            ));
        }

        if let Some(period) = self.batch.throttle_period {
            if !period.is_finite() || period < 0.0 {
                return Err(AgentError::ConfigError(
                    "batch.throttle_period must be a non-negative number of seconds".to_string(),
                ));
            }
        }

        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(AgentError::ConfigError(format!(
                "Unknown log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}
