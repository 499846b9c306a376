//! Action requests embedded in model output and their dispatch to tools

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod dispatcher;
pub mod parser;

pub use dispatcher::{ActionDispatcher, DispatchOutcome};
pub use parser::JsonActionParser;

/// A request to call `function` with `arguments`, as declared by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub function: String,
    pub arguments: Map<String, Value>,
}

impl ActionCall {
    pub fn new(function: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            function: function.into(),
            arguments,
        }
    }
}

/// Finds action declarations in a raw assistant message.
pub trait ActionParser: Send + Sync {
    /// `None` when the message declares no actions.
    fn parse(&self, message: &Value) -> Option<Vec<ActionCall>>;
}
