//! A conversation with its tools, counters and directive engine
//!
//! [`Session`] owns everything a directive mutates: the [`Branch`] log, the
//! [`ToolRegistry`] and the [`SessionMetrics`]. Calls take `&mut self`, so a
//! session has a single writer; share one across tasks behind a lock.
//!
//! The session also carries the retry and batch settings used by
//! [`Session::map_tool`].

use serde_json::Value;
use std::sync::Arc;

use crate::branch::Branch;
use crate::call::{map_call, CallParams, MapCallConfig, MapCallParams, RetryConfig};
use crate::config::{DirectiveSettings, LoomConfig};
use crate::directive::{ChatRequest, ChatResponse, Directive};
use crate::errors::AgentError;
use crate::form::Form;
use crate::llm::{HttpModelEndpoint, ModelEndpoint};
use crate::metrics::SessionMetrics;
use crate::tools::{EventStatus, Tool, ToolRegistry};

pub struct Session {
    branch: Branch,
    registry: ToolRegistry,
    metrics: SessionMetrics,
    directive: Directive,
    retry: RetryConfig,
    batch: MapCallConfig,
}

impl Session {
    pub fn new(model: Arc<dyn ModelEndpoint>) -> Self {
        Self::from_directive(Directive::new(model))
    }

    pub fn from_directive(directive: Directive) -> Self {
        let branch = match &directive.settings().system {
            Some(system) => Branch::with_system(system.clone()),
            None => Branch::new(),
        };
        Self {
            branch,
            registry: ToolRegistry::new(),
            metrics: SessionMetrics::new(),
            directive,
            retry: RetryConfig::default(),
            batch: MapCallConfig::default(),
        }
    }

    /// A session talking to the HTTP endpoint described by `config`.
    pub fn from_config(config: &LoomConfig) -> Self {
        log::info!(
            "Creating session for model '{}' at {}",
            config.model.model,
            config.model.endpoint
        );
        let endpoint = HttpModelEndpoint::from_settings(&config.model);
        let directive = Directive::new(Arc::new(endpoint))
            .with_settings(config.directive.clone())
            .with_request_config(config.model.request_config());
        Self::from_directive(directive).with_call_config(config.retry.clone(), config.batch.clone())
    }

    pub fn with_settings(self, settings: DirectiveSettings) -> Self {
        Self {
            directive: self.directive.with_settings(settings),
            ..self
        }
    }

    /// Retry and batch settings for [`Session::map_tool`].
    pub fn with_call_config(mut self, retry: RetryConfig, batch: MapCallConfig) -> Self {
        self.retry = retry;
        self.batch = batch;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn batch_config(&self) -> &MapCallConfig {
        &self.batch
    }

    /// Continues an existing conversation.
    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.branch = branch;
        self
    }

    pub fn register_tool(&mut self, tool: Tool) -> Result<(), AgentError> {
        log::debug!("Registering tool: {}", tool.name);
        self.registry.register(tool)
    }

    /// Registers `tool`, replacing any tool with the same name.
    pub fn replace_tool(&mut self, tool: Tool) -> Option<Arc<Tool>> {
        self.registry.replace(tool)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    pub fn into_branch(self) -> Branch {
        self.branch
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub async fn chat(&mut self, request: impl Into<ChatRequest>) -> Result<ChatResponse, AgentError> {
        self.directive
            .chat(&mut self.branch, &self.registry, &mut self.metrics, request.into())
            .await
    }

    /// Runs the tool `name` once per argument object under the session's
    /// retry and batch settings. Results keep input order; a failed
    /// invocation is retried and, once retries are spent, fails the whole map
    /// with the error of the lowest failing index. Nothing is recorded in the
    /// branch.
    pub async fn map_tool(&self, name: &str, arguments: Vec<Value>) -> Result<Vec<Option<Value>>, AgentError> {
        if !self.registry.contains(name) {
            return Err(AgentError::ToolNotFound(name.to_string()));
        }
        log::info!("Mapping tool '{}' over {} argument set(s)", name, arguments.len());

        let params = MapCallParams::new(CallParams::new(self.retry.clone()), self.batch.clone());
        let registry = self.registry.clone();
        let name = name.to_string();
        map_call(
            arguments,
            move |arguments: Value| {
                let registry = registry.clone();
                let name = name.clone();
                async move {
                    let Value::Object(arguments) = arguments else {
                        return Err(AgentError::ArgumentMismatch {
                            tool: name,
                            message: format!("expected an argument object, got {}", arguments),
                        });
                    };
                    let invocation = registry.invoke(&name, arguments).await?;
                    match invocation.status() {
                        EventStatus::Completed => Ok(invocation.response().cloned().unwrap_or(Value::Null)),
                        _ => Err(AgentError::ExecutionError(
                            invocation.error().unwrap_or("tool did not complete").to_string(),
                        )),
                    }
                }
            },
            &params,
        )
        .await
    }

    pub async fn direct(&mut self, form: Form) -> Result<Form, AgentError> {
        log::info!("Directive started for form {}: {}", form.id, form.instruction);
        let form = self
            .directive
            .direct(&mut self.branch, &self.registry, &mut self.metrics, form)
            .await?;
        log::info!(
            "Directive finished for form {} with {} extension(s)",
            form.id,
            form.extension_forms.len()
        );
        Ok(form)
    }
}
