//! Directive execution engine for LLM conversations with tool calling.
//!
//! The crate drives a conversation with a chat-completion model through
//! bounded BUILD → CALL → PARSE → ACT → EXTEND cycles, and provides the
//! executors those cycles are built on.
//!
//! # Architecture Overview
//!
//! - **Call executors** (`call`): retrying and timed calls with backoff,
//!   timeouts, error maps and defaults, plus a bounded-concurrency batch
//!   caller
//! - **Tools** (`tools`): a name-keyed registry of native, blocking and
//!   remote invocables with argument contracts and JSON schemas
//! - **Actions** (`actions`): extraction of action requests from model
//!   output and their ordered concurrent dispatch
//! - **Directives** (`directive`, `form`, `session`): the directive loop over
//!   a conversation `Branch`, with structured forms and per-session metrics
//! - **Configuration and logging** (`config`, `logging`): YAML configuration
//!   with serde defaults and `env_logger` setup

pub mod actions;
pub mod branch;
pub mod call;
pub mod config;
pub mod core_types;
pub mod directive;
pub mod errors;
pub mod form;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod parse;
pub mod session;
pub mod tools;

pub use actions::{ActionCall, ActionDispatcher, ActionParser, DispatchOutcome, JsonActionParser};
pub use branch::{Branch, BranchMessage, MessageContent};
pub use call::{
    batch_call, map_call, retry_call, timed_call, CallOutput, CallParams, MapCallConfig, MapCallParams,
    RetryConfig,
};
pub use config::*;
pub use directive::{ChatRequest, ChatResponse, Directive};
pub use errors::{AgentError, DirectivePhase, ErrorKind};
pub use form::Form;
pub use llm::{HttpModelEndpoint, ModelEndpoint};
pub use metrics::SessionMetrics;
pub use session::Session;
pub use tools::{EventStatus, Invocable, Invocation, Tool, ToolParameter, ToolRegistry, ToolSelection};

#[cfg(test)]
pub mod test_utils;
