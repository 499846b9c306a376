//! Retry, timeout and fan-out primitives shared by every async operation
//!
//! The directive loop, the batch caller and user code all wrap fallible
//! async work in the same parameter object: an initial delay, a per-attempt
//! timeout, retry with exponential backoff, an optional default returned
//! after exhaustion, and an error map that turns selected error kinds into
//! non-retried soft failures.

pub mod batch;
pub mod retry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, ErrorKind};

pub use batch::{batch_call, map_call, map_call_outputs, to_list, MapCallConfig, MapCallParams, Shape};
pub use retry::{retry_call, retry_call_blocking, timed_call};

/// Serializable part of the call parameters.
///
/// Durations are expressed in seconds so they read naturally in YAML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub num_retries: u32,
    /// Delay before the first attempt only.
    #[serde(default)]
    pub delay: f64,
    /// Delay between a failed attempt and the next one.
    #[serde(default)]
    pub retry_delay: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for each individual attempt.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub timing: bool,
    #[serde(default = "default_verbose")]
    pub verbose: bool,
    /// Prefix for error messages raised by the executor.
    #[serde(default)]
    pub error_msg: Option<String>,
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_verbose() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            num_retries: 0,
            delay: 0.0,
            retry_delay: 0.0,
            backoff_factor: default_backoff_factor(),
            timeout: None,
            timing: false,
            verbose: default_verbose(),
            error_msg: None,
        }
    }
}

impl RetryConfig {
    pub fn with_retries(mut self, num_retries: u32) -> Self {
        self.num_retries = num_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: f64, backoff_factor: f64) -> Self {
        self.retry_delay = retry_delay;
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: f64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timing(mut self, timing: bool) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_error_msg(mut self, error_msg: impl Into<String>) -> Self {
        self.error_msg = Some(error_msg.into());
        self
    }

    pub(crate) fn message_prefix(&self) -> String {
        match &self.error_msg {
            Some(msg) if !msg.is_empty() => format!("{} ", msg),
            _ => String::new(),
        }
    }
}

/// Seconds as a `Duration`. Negative and NaN values are zero; values too
/// large to represent saturate to `Duration::MAX`.
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

pub type ErrorHandler = Arc<dyn Fn(&AgentError) + Send + Sync>;

/// Maps error kinds to handlers. An error whose kind has a handler is
/// reported to it and turned into a `None` result instead of being retried.
#[derive(Clone, Default)]
pub struct ErrorMap {
    handlers: HashMap<ErrorKind, ErrorHandler>,
}

impl ErrorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, kind: ErrorKind, handler: F)
    where
        F: Fn(&AgentError) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler registered for `err`, returning whether one existed.
    pub fn handle(&self, err: &AgentError) -> bool {
        match self.handlers.get(&err.kind()) {
            Some(handler) => {
                handler(err);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ErrorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Complete parameter object for one wrapped operation.
#[derive(Debug, Clone)]
pub struct CallParams<T> {
    pub config: RetryConfig,
    pub default: Option<T>,
    pub error_map: ErrorMap,
}

impl<T> Default for CallParams<T> {
    fn default() -> Self {
        Self {
            config: RetryConfig::default(),
            default: None,
            error_map: ErrorMap::default(),
        }
    }
}

impl<T> CallParams<T> {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            default: None,
            error_map: ErrorMap::default(),
        }
    }

    pub fn with_default(mut self, default: T) -> Self {
        self.default = Some(default);
        self
    }

    pub fn on_error<F>(mut self, kind: ErrorKind, handler: F) -> Self
    where
        F: Fn(&AgentError) + Send + Sync + 'static,
    {
        self.error_map.insert(kind, handler);
        self
    }
}

/// Result of a wrapped call.
///
/// `value` is `None` when an error-map handler absorbed the failure.
/// `elapsed` is only populated when `timing` was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutput<T> {
    pub value: Option<T>,
    pub elapsed: Option<Duration>,
    pub attempts: u32,
}

impl<T> CallOutput<T> {
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn into_timed(self) -> (Option<T>, Duration) {
        (self.value, self.elapsed.unwrap_or_default())
    }
}
