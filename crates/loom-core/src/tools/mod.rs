//! Tool system for extending directives with callable functionality
//!
//! A [`Tool`] pairs a name and an argument contract with an [`Invocable`]
//! capability: an async Rust function, a blocking function run on the worker
//! pool, or a remote HTTP endpoint. Tools live in a per-session
//! [`ToolRegistry`] keyed by name. Every call goes through an
//! [`Invocation`] which validates the arguments, runs the optional hooks and
//! records the outcome exactly once.
//!
//! Argument contract: every declared parameter is a required field; the
//! parameters without a default form the minimum acceptable set. Strict
//! tools accept exactly the required fields, non-strict tools accept any
//! superset of the minimum set. Missing defaults are filled in before the
//! call.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AgentError;

pub mod calculator;
pub mod invocable;
pub mod invocation;

pub use calculator::calculator_tool;
pub use invocable::{Hook, Invocable};
pub use invocation::{EventStatus, Invocation};

/// One declared argument of a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    /// JSON schema fragment describing the value.
    #[serde(default)]
    pub schema: Value,
    /// Filled in when the caller omits the argument. A parameter with a
    /// default is optional.
    #[serde(default)]
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: impl Into<String>, kind: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            schema: json!({ "type": kind, "description": description }),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: &str, description: &str, default: Value) -> Self {
        Self {
            default: Some(default),
            ..Self::required(name, kind, description)
        }
    }
}

#[derive(Clone)]
pub struct Tool {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub invocable: Invocable,
    pub preprocessor: Option<Hook>,
    pub postprocessor: Option<Hook>,
    pub strict: bool,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("invocable", &self.invocable)
            .field("strict", &self.strict)
            .finish()
    }
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, invocable: Invocable) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            invocable,
            preprocessor: None,
            postprocessor: None,
            strict: false,
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_preprocessor(mut self, hook: Hook) -> Self {
        self.preprocessor = Some(hook);
        self
    }

    pub fn with_postprocessor(mut self, hook: Hook) -> Self {
        self.postprocessor = Some(hook);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn required_fields(&self) -> BTreeSet<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn minimum_acceptable_fields(&self) -> BTreeSet<&str> {
        self.parameters
            .iter()
            .filter(|p| p.default.is_none())
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn validate_arguments(&self, arguments: &Map<String, Value>) -> Result<(), AgentError> {
        let keys: BTreeSet<&str> = arguments.keys().map(String::as_str).collect();

        if self.strict {
            let required = self.required_fields();
            if keys != required {
                return Err(AgentError::ArgumentMismatch {
                    tool: self.name.clone(),
                    message: format!("expected exactly {:?}, got {:?}", required, keys),
                });
            }
        } else {
            let minimum = self.minimum_acceptable_fields();
            let missing: Vec<&str> = minimum.difference(&keys).copied().collect();
            if !missing.is_empty() {
                return Err(AgentError::ArgumentMismatch {
                    tool: self.name.clone(),
                    message: format!("missing {:?}", missing),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn fill_defaults(&self, mut arguments: Map<String, Value>) -> Map<String, Value> {
        for parameter in &self.parameters {
            if let Some(default) = &parameter.default {
                arguments
                    .entry(parameter.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        arguments
    }

    /// Function-calling schema in the chat-completions `tools` format.
    pub fn schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.schema.clone()))
            .collect();
        let required: Vec<&str> = self.minimum_acceptable_fields().into_iter().collect();

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// Which registered tools to advertise to the model.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ToolSelection {
    All,
    #[default]
    None,
    Named(Vec<String>),
}

impl From<bool> for ToolSelection {
    fn from(value: bool) -> Self {
        if value {
            ToolSelection::All
        } else {
            ToolSelection::None
        }
    }
}

/// Name-keyed set of tools.
///
/// Mutated only through `&mut self`, so a registry shared across tasks needs
/// an outer lock with a single writer.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) -> Result<(), AgentError> {
        if self.tools.contains_key(&tool.name) {
            return Err(AgentError::DuplicateName(tool.name));
        }
        log::debug!("Registered tool '{}'", tool.name);
        self.tools.insert(tool.name.clone(), Arc::new(tool));
        Ok(())
    }

    /// Registers `tool`, returning the tool it displaced.
    pub fn replace(&mut self, tool: Tool) -> Option<Arc<Tool>> {
        log::debug!("Re-registered tool '{}'", tool.name);
        self.tools.insert(tool.name.clone(), Arc::new(tool))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Tool>> {
        self.tools.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas of the selected tools, sorted by name.
    pub fn schemas(&self, selection: &ToolSelection) -> Result<Vec<Value>, AgentError> {
        match selection {
            ToolSelection::None => Ok(Vec::new()),
            ToolSelection::All => Ok(self
                .names()
                .iter()
                .filter_map(|name| self.tools.get(name))
                .map(|tool| tool.schema())
                .collect()),
            ToolSelection::Named(names) => names
                .iter()
                .map(|name| {
                    self.tools
                        .get(name)
                        .map(|tool| tool.schema())
                        .ok_or_else(|| AgentError::ToolNotFound(name.clone()))
                })
                .collect(),
        }
    }

    /// Binds `arguments` to the named tool without running it.
    ///
    /// Arguments that break the tool's contract yield an invocation that is
    /// already `Failed`; only an unknown name is an error.
    pub fn prepare(&self, name: &str, arguments: Map<String, Value>) -> Result<Invocation, AgentError> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        match tool.validate_arguments(&arguments) {
            Ok(()) => {
                let arguments = tool.fill_defaults(arguments);
                Ok(Invocation::new(tool, arguments))
            }
            Err(err) => {
                log::warn!("Rejected call to '{}': {}", name, err);
                Ok(Invocation::rejected(tool, arguments, err))
            }
        }
    }

    pub async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<Invocation, AgentError> {
        Ok(self.prepare(name, arguments)?.invoke().await)
    }
}
