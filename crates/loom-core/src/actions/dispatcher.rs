//! Concurrent fan-out of parsed action requests
//!
//! Every requested name is resolved before anything is recorded, so an
//! unknown tool aborts the whole batch with no partial effect. Requests are
//! then appended to the branch in declaration order, all invocations run
//! concurrently, and responses are appended in request order regardless of
//! which tool finished first. A failing tool never cancels its siblings.

use futures_util::future::join_all;
use serde_json::Value;
use uuid::Uuid;

use crate::actions::{ActionCall, ActionParser, JsonActionParser};
use crate::branch::Branch;
use crate::errors::AgentError;
use crate::tools::{EventStatus, Invocation, ToolRegistry};

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// No declarations were found; carries the message content unchanged.
    NoAction(String),
    /// Requests were recorded but not run.
    Requested(Vec<Invocation>),
    /// Requests and their responses are both recorded in the branch.
    Handled(Vec<Invocation>),
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, DispatchOutcome::Handled(_))
    }

    pub fn invocations(&self) -> &[Invocation] {
        match self {
            DispatchOutcome::NoAction(_) => &[],
            DispatchOutcome::Requested(invocations) | DispatchOutcome::Handled(invocations) => {
                invocations
            }
        }
    }
}

pub struct ActionDispatcher {
    parser: Box<dyn ActionParser>,
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new(Box::new(JsonActionParser::new()))
    }
}

fn message_content(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        Value::Object(object) => match object.get("content") {
            Some(Value::String(text)) => text.clone(),
            _ => message.to_string(),
        },
        other => other.to_string(),
    }
}

impl ActionDispatcher {
    pub fn new(parser: Box<dyn ActionParser>) -> Self {
        Self { parser }
    }

    pub fn parser(&self) -> &dyn ActionParser {
        self.parser.as_ref()
    }

    /// Parses `message` for action declarations and dispatches them.
    pub async fn dispatch(
        &self,
        message: &Value,
        branch: &mut Branch,
        registry: &ToolRegistry,
        invoke: bool,
    ) -> Result<DispatchOutcome, AgentError> {
        match self.parser.parse(message) {
            Some(calls) if !calls.is_empty() => self.dispatch_calls(calls, branch, registry, invoke).await,
            _ => Ok(DispatchOutcome::NoAction(message_content(message))),
        }
    }

    /// Dispatches already-parsed declarations.
    pub async fn dispatch_calls(
        &self,
        calls: Vec<ActionCall>,
        branch: &mut Branch,
        registry: &ToolRegistry,
        invoke: bool,
    ) -> Result<DispatchOutcome, AgentError> {
        let mut pending = Vec::with_capacity(calls.len());
        for call in &calls {
            if call.function.trim().is_empty() {
                return Err(AgentError::MalformedAction(
                    "action declaration has no function name".to_string(),
                ));
            }
            pending.push(registry.prepare(&call.function, call.arguments.clone())?);
        }

        let request_ids: Vec<Uuid> = calls
            .into_iter()
            .zip(&pending)
            .map(|(call, invocation)| {
                branch.add_action_request(call.function, call.arguments, invocation.tool().id)
            })
            .collect();

        log::info!(
            "Dispatching {} action(s): {}",
            pending.len(),
            pending
                .iter()
                .map(|i| i.tool_name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        if !invoke {
            return Ok(DispatchOutcome::Requested(pending));
        }

        let finished: Vec<Invocation> = join_all(pending.into_iter().map(Invocation::invoke)).await;

        for (request_id, invocation) in request_ids.iter().zip(&finished) {
            branch.add_action_response(*request_id, invocation);
        }

        let failed = finished
            .iter()
            .filter(|i| i.status() == EventStatus::Failed)
            .count();
        if failed > 0 {
            log::warn!("{} of {} action(s) failed", failed, finished.len());
        }

        Ok(DispatchOutcome::Handled(finished))
    }
}
