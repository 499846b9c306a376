//! A single tool call and its recorded outcome
//!
//! An invocation starts `Pending` and moves to `Completed` or `Failed`
//! exactly once. Running it consumes the pending value and hands back the
//! terminal one, so a finished invocation cannot be run or changed again.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::errors::AgentError;
use crate::tools::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    id: Uuid,
    tool: Arc<Tool>,
    arguments: Map<String, Value>,
    status: EventStatus,
    response: Option<Value>,
    error: Option<String>,
    duration: Option<Duration>,
}

impl Invocation {
    pub(crate) fn new(tool: Arc<Tool>, arguments: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool,
            arguments,
            status: EventStatus::Pending,
            response: None,
            error: None,
            duration: None,
        }
    }

    pub(crate) fn rejected(tool: Arc<Tool>, arguments: Map<String, Value>, err: AgentError) -> Self {
        Self {
            status: EventStatus::Failed,
            error: Some(err.to_string()),
            duration: Some(Duration::ZERO),
            ..Self::new(tool, arguments)
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tool(&self) -> &Arc<Tool> {
        &self.tool
    }

    pub fn tool_name(&self) -> &str {
        &self.tool.name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_terminal(&self) -> bool {
        self.status != EventStatus::Pending
    }

    /// Runs preprocessor, callable and postprocessor. Terminal invocations
    /// are returned unchanged.
    pub async fn invoke(mut self) -> Invocation {
        if self.is_terminal() {
            return self;
        }

        let start = Instant::now();
        let outcome = self.run().await;
        self.duration = Some(start.elapsed());

        match outcome {
            Ok(response) => {
                log::info!(
                    "Tool '{}' completed in {:?}",
                    self.tool.name,
                    self.duration.unwrap_or_default()
                );
                self.response = Some(response);
                self.status = EventStatus::Completed;
            }
            Err(err) => {
                log::warn!("Tool '{}' failed: {}", self.tool.name, err);
                self.error = Some(err.to_string());
                self.status = EventStatus::Failed;
            }
        }
        self
    }

    async fn run(&self) -> Result<Value, AgentError> {
        let arguments = match &self.tool.preprocessor {
            Some(hook) => match hook.apply(Value::Object(self.arguments.clone())).await? {
                Value::Object(map) => map,
                other => {
                    return Err(AgentError::ExecutionError(format!(
                        "Preprocessor for '{}' must return an object, got {}",
                        self.tool.name, other
                    )))
                }
            },
            None => self.arguments.clone(),
        };

        let raw = self.tool.invocable.call(arguments).await?;

        match &self.tool.postprocessor {
            Some(hook) => hook.apply(raw).await,
            None => Ok(raw),
        }
    }

    /// Content recorded in conversation state for this outcome.
    pub fn to_response_content(&self) -> Value {
        let output = match self.status {
            EventStatus::Completed => self.response.clone().unwrap_or(Value::Null),
            _ => json!({ "error": self.error.clone().unwrap_or_default() }),
        };
        json!({
            "function": self.tool.name,
            "arguments": self.arguments,
            "output": output,
        })
    }
}
