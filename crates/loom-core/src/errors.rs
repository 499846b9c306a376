//! Error types for every phase of directive execution
//!
//! A single error enum covers the retry executor, the tool registry, the
//! action dispatcher and the directive loop. Each variant maps to an
//! [`ErrorKind`] discriminant so that callers can route specific failure
//! classes to handlers (see `CallParams::on_error`) without matching on
//! message text.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("{message}Timeout {seconds} seconds exceeded")]
    Timeout { seconds: f64, message: String },
    #[error("{0}")]
    ExecutionError(String),
    #[error("Tool '{0}' not found in registry")]
    ToolNotFound(String),
    #[error("Tool '{0}' is already registered")]
    DuplicateName(String),
    #[error("Arguments for '{tool}' do not match the function schema: {message}")]
    ArgumentMismatch { tool: String, message: String },
    #[error("{message}")]
    RetriesExhausted { attempts: u32, message: String },
    #[error("Malformed action declaration: {0}")]
    MalformedAction(String),
    #[error("Model call failed: {0}")]
    ModelError(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Directive failed during {phase}: {message}")]
    Directive {
        phase: DirectivePhase,
        message: String,
    },
}

/// Discriminant of [`AgentError`], used as the key of error maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Execution,
    ToolNotFound,
    DuplicateName,
    ArgumentMismatch,
    RetriesExhausted,
    MalformedAction,
    Model,
    Parsing,
    Config,
    Io,
    Directive,
}

/// The step of a directive turn an error surfaced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectivePhase {
    Build,
    Call,
    Parse,
    Act,
    Extend,
}

impl fmt::Display for DirectivePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirectivePhase::Build => "build",
            DirectivePhase::Call => "call",
            DirectivePhase::Parse => "parse",
            DirectivePhase::Act => "act",
            DirectivePhase::Extend => "extend",
        };
        f.write_str(name)
    }
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Timeout { .. } => ErrorKind::Timeout,
            AgentError::ExecutionError(_) => ErrorKind::Execution,
            AgentError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            AgentError::DuplicateName(_) => ErrorKind::DuplicateName,
            AgentError::ArgumentMismatch { .. } => ErrorKind::ArgumentMismatch,
            AgentError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            AgentError::MalformedAction(_) => ErrorKind::MalformedAction,
            AgentError::ModelError(_) => ErrorKind::Model,
            AgentError::ParsingError(_) => ErrorKind::Parsing,
            AgentError::ConfigError(_) => ErrorKind::Config,
            AgentError::IoError(_) => ErrorKind::Io,
            AgentError::Directive { .. } => ErrorKind::Directive,
        }
    }

    /// Wraps this error as a failure of the given directive phase. Errors
    /// that already carry a phase keep the innermost one.
    pub fn in_phase(self, phase: DirectivePhase) -> AgentError {
        match self {
            AgentError::Directive { .. } => self,
            other => AgentError::Directive {
                phase,
                message: other.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::ModelError(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::ParsingError(err.to_string())
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::ConfigError(err.to_string())
    }
}
