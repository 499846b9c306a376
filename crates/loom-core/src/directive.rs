//! The directive loop: BUILD → CALL → PARSE → (ACT)? → (EXTEND)* → DONE
//!
//! `chat` runs a single turn against the model and dispatches any actions
//! the reply declares. `direct` drives a [`Form`] through a turn, runs the
//! declared actions only when the form marks them as required, then works through extension steps from an
//! explicit worklist until the extension budget is spent or the model stops
//! asking for more. A final answer equal to the pending-action sentinel
//! triggers one follow-up turn asking for the answer from what was gathered.

use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::actions::{ActionDispatcher, DispatchOutcome};
use crate::branch::{Branch, MessageContent};
use crate::call::{retry_call, CallParams, RetryConfig};
use crate::config::DirectiveSettings;
use crate::errors::{AgentError, DirectivePhase};
use crate::form::{Form, ANSWER_FIELD};
use crate::llm::{ModelEndpoint, ResponseParser};
use crate::metrics::SessionMetrics;
use crate::parse::process_model_response;
use crate::tools::{Invocation, ToolRegistry, ToolSelection};

/// Follow-up instruction sent when the answer is the pending-action sentinel.
pub const FINAL_ANSWER_PROMPT: &str =
    "please provide final answer basing on the above information, only provide answer field as a string";

/// Extension step used when the model asks for more work without a plan.
pub const CONTINUE_STEP: &str = "Continue the task from where the previous answer left off.";

/// One chat turn.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub instruction: String,
    pub context: Option<Value>,
    pub guidance: Option<String>,
    /// Field names with descriptions; when set the reply is validated into
    /// this shape.
    pub output_fields: Option<Map<String, Value>>,
    pub tools: ToolSelection,
    /// Overrides `DirectiveSettings::invoke_tools`.
    pub invoke_tools: Option<bool>,
    /// Dispatch only native `tool_calls`; actions declared in the text are
    /// left for the caller.
    pub native_calls_only: bool,
    pub clear_messages: bool,
    pub system: Option<String>,
    /// Overrides `DirectiveSettings::model_retry`.
    pub retry: Option<RetryConfig>,
    /// Request fields layered over the engine's request configuration.
    pub config: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    pub fn with_output_fields(mut self, fields: Map<String, Value>) -> Self {
        self.output_fields = Some(fields);
        self
    }

    pub fn with_tools(mut self, tools: impl Into<ToolSelection>) -> Self {
        self.tools = tools.into();
        self
    }

    pub fn invoke_tools(mut self, invoke: bool) -> Self {
        self.invoke_tools = Some(invoke);
        self
    }

    pub fn native_calls_only(mut self) -> Self {
        self.native_calls_only = true;
        self
    }

    pub fn clear_messages(mut self) -> Self {
        self.clear_messages = true;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

impl From<&str> for ChatRequest {
    fn from(instruction: &str) -> Self {
        Self::new(instruction)
    }
}

impl From<String> for ChatRequest {
    fn from(instruction: String) -> Self {
        Self::new(instruction)
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Text content of the reply.
    pub content: String,
    /// The reply validated into the requested output fields, when requested
    /// and recoverable.
    pub parsed: Option<Map<String, Value>>,
    pub actions: DispatchOutcome,
}

impl ChatResponse {
    /// True when the reply declared actions and their responses are already
    /// recorded in the branch.
    pub fn actions_handled(&self) -> bool {
        self.actions.is_handled()
    }

    pub fn invocations(&self) -> &[Invocation] {
        self.actions.invocations()
    }
}

pub struct Directive {
    model: Arc<dyn ModelEndpoint>,
    dispatcher: ActionDispatcher,
    settings: DirectiveSettings,
    request_config: Map<String, Value>,
}

fn system_text(branch: &Branch) -> Option<String> {
    match branch.system().map(|m| &m.content) {
        Some(MessageContent::System { text }) => Some(text.clone()),
        _ => None,
    }
}

impl Directive {
    pub fn new(model: Arc<dyn ModelEndpoint>) -> Self {
        Self {
            model,
            dispatcher: ActionDispatcher::default(),
            settings: DirectiveSettings::default(),
            request_config: Map::new(),
        }
    }

    pub fn with_settings(mut self, settings: DirectiveSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_request_config(mut self, config: Map<String, Value>) -> Self {
        self.request_config = config;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: ActionDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn settings(&self) -> &DirectiveSettings {
        &self.settings
    }

    fn prepare_system(&self, branch: &mut Branch, request: &ChatRequest) {
        if request.clear_messages || self.settings.clear_messages {
            let system = request
                .system
                .clone()
                .or_else(|| system_text(branch))
                .or_else(|| self.settings.system.clone());
            branch.clear();
            if let Some(system) = system {
                branch.set_system(system);
            }
        } else if let Some(system) = &request.system {
            branch.set_system(system.clone());
        } else if branch.system().is_none() {
            if let Some(system) = &self.settings.system {
                branch.set_system(system.clone());
            }
        }
    }

    /// Runs one BUILD → CALL → PARSE turn and dispatches any declared
    /// actions when tools were offered.
    pub async fn chat(
        &self,
        branch: &mut Branch,
        registry: &ToolRegistry,
        metrics: &mut SessionMetrics,
        request: ChatRequest,
    ) -> Result<ChatResponse, AgentError> {
        // BUILD
        self.prepare_system(branch, &request);

        let schemas = registry
            .schemas(&request.tools)
            .map_err(|e| e.in_phase(DirectivePhase::Build))?;
        let mut config = self.request_config.clone();
        config.extend(request.config);
        if !schemas.is_empty() {
            config.insert("tools".to_string(), Value::Array(schemas));
            config
                .entry("tool_choice")
                .or_insert_with(|| Value::String("auto".to_string()));
        }

        branch.add_instruction(
            request.instruction,
            request.context,
            request.guidance,
            request.output_fields.clone(),
        );
        let messages = branch.to_chat_messages();

        // CALL
        let params = CallParams::new(
            request
                .retry
                .unwrap_or_else(|| self.settings.model_retry.clone()),
        );
        let model: &dyn ModelEndpoint = self.model.as_ref();
        let (messages, request_config) = (messages.as_slice(), &config);
        let output = match retry_call(&params, move || model.call(messages, request_config)).await {
            Ok(output) => output,
            Err(err) => {
                if let AgentError::RetriesExhausted { attempts, .. } = &err {
                    metrics.model_calls += u64::from(*attempts);
                }
                metrics.tasks_failed += 1;
                return Err(err.in_phase(DirectivePhase::Call));
            }
        };
        metrics.model_calls += u64::from(output.attempts);
        let Some((payload, response)) = output.into_value() else {
            metrics.tasks_failed += 1;
            return Err(AgentError::ModelError("model call produced no response".to_string())
                .in_phase(DirectivePhase::Call));
        };

        // PARSE
        if let Value::Object(mut payload) = payload {
            payload.remove("messages");
            branch.update_last_instruction_meta(payload);
        }

        let completion = match ResponseParser::parse_completion(&response) {
            Ok(completion) => {
                metrics.tasks_succeeded += 1;
                if let Some(usage) = &completion.usage {
                    metrics.record_usage(usage);
                }
                completion
            }
            Err(err) => {
                metrics.tasks_failed += 1;
                log::error!("Unrecognized model response: {}", err);
                return Err(err.in_phase(DirectivePhase::Parse));
            }
        };

        let recorded = if completion.content.is_empty() && completion.has_tool_calls() {
            Value::Array(completion.tool_calls.clone()).to_string()
        } else {
            completion.content.clone()
        };
        branch.add_assistant_response(recorded, completion.metadata.clone());

        let actions = if request.tools == ToolSelection::None
            || (request.native_calls_only && !completion.has_tool_calls())
        {
            DispatchOutcome::NoAction(completion.content.clone())
        } else {
            let invoke = request.invoke_tools.unwrap_or(self.settings.invoke_tools);
            let message = if request.native_calls_only {
                json!({ "tool_calls": completion.tool_calls.clone() })
            } else {
                completion.message.clone()
            };
            self.dispatcher
                .dispatch(&message, branch, registry, invoke)
                .await
                .map_err(|e| e.in_phase(DirectivePhase::Act))?
        };
        metrics.record_invocations(actions.invocations());

        let parsed = request.output_fields.as_ref().and_then(|fields| {
            let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
            process_model_response(&completion.content, &keys)
        });
        if request.output_fields.is_some() && parsed.is_none() {
            log::warn!("Reply did not match the requested fields; keeping raw content");
        }

        Ok(ChatResponse {
            content: completion.content,
            parsed,
            actions,
        })
    }

    /// One BUILD → CALL → PARSE → ACT cycle for `form`.
    async fn run_cycle(
        &self,
        branch: &mut Branch,
        registry: &ToolRegistry,
        metrics: &mut SessionMetrics,
        mut form: Form,
    ) -> Result<Form, AgentError> {
        let mut request = ChatRequest::new(form.instruction.clone())
            .with_output_fields(form.output_fields())
            .with_tools(form.allow_action)
            .native_calls_only();
        request.context = form.context.clone();
        request.guidance = form.guidance_text();

        let response = self.chat(branch, registry, metrics, request).await?;
        match &response.parsed {
            Some(parsed) => form.fill(parsed),
            None => form.fill_raw(&response.content),
        }

        // ACT
        if response.actions_handled() {
            form.record_actions(response.invocations());
        } else if form.action_required() && self.settings.invoke_tools {
            let calls = form.actions().map_err(|e| e.in_phase(DirectivePhase::Act))?;
            let outcome = self
                .dispatcher
                .dispatch_calls(calls, branch, registry, true)
                .await
                .map_err(|e| e.in_phase(DirectivePhase::Act))?;
            metrics.record_invocations(outcome.invocations());
            form.record_actions(outcome.invocations());
        }

        Ok(form)
    }

    /// Runs extension cycles for `form` within `budget`.
    async fn extend(
        &self,
        branch: &mut Branch,
        registry: &ToolRegistry,
        metrics: &mut SessionMetrics,
        form: &mut Form,
        budget: usize,
    ) -> Result<(), AgentError> {
        let mut worklist: VecDeque<String> = form.plan_steps().into();
        if worklist.is_empty() {
            worklist.push_back(CONTINUE_STEP.to_string());
        }

        let mut remaining = budget;
        while remaining > 0 {
            let Some(step) = worklist.pop_front() else {
                break;
            };
            let seed = form.extension_form(&step, form.extension_forms.len() + 1);
            let child = self
                .run_cycle(branch, registry, metrics, seed)
                .await
                .map_err(|e| e.in_phase(DirectivePhase::Extend))?;
            remaining -= 1;
            metrics.extensions += 1;

            let more = child.extension_required();
            if more {
                let steps = child.plan_steps();
                if !steps.is_empty() {
                    worklist = steps.into();
                } else if worklist.is_empty() {
                    worklist.push_back(CONTINUE_STEP.to_string());
                }
            }
            form.extension_forms.push(child);

            if !more {
                return Ok(());
            }
        }

        if remaining == 0 {
            log::warn!(
                "Extension budget of {} exhausted for form {}",
                budget,
                form.id
            );
        }
        Ok(())
    }

    /// Drives `form` to completion and returns it filled, with any action
    /// responses and extension forms attached.
    pub async fn direct(
        &self,
        branch: &mut Branch,
        registry: &ToolRegistry,
        metrics: &mut SessionMetrics,
        form: Form,
    ) -> Result<Form, AgentError> {
        let mut form = self.run_cycle(branch, registry, metrics, form).await?;

        if form.extension_required() {
            let budget = form.max_extension.unwrap_or(self.settings.max_extension);
            log::info!("Form {} requested extension (budget {})", form.id, budget);
            self.extend(branch, registry, metrics, &mut form, budget).await?;
        }

        let pending = match form.extension_forms.last() {
            Some(last) => last.answer_is_pending_action(),
            None => form.answer_is_pending_action(),
        };
        if pending {
            log::info!("Answer depends on pending actions; asking for a final answer");
            let mut fields = Map::new();
            fields.insert(ANSWER_FIELD.to_string(), json!("The final answer, as a string."));
            let response = self
                .chat(
                    branch,
                    registry,
                    metrics,
                    ChatRequest::new(FINAL_ANSWER_PROMPT).with_output_fields(fields),
                )
                .await?;
            let answer = response
                .parsed
                .and_then(|mut parsed| parsed.remove(ANSWER_FIELD))
                .filter(|answer| !answer.is_null())
                .unwrap_or(Value::String(response.content));
            match form.extension_forms.last_mut() {
                Some(last) => last.set_answer(answer),
                None => form.set_answer(answer),
            }
        }

        Ok(form)
    }
}
