//! Per-session counters for the directive loop

use serde::{Deserialize, Serialize};

use crate::core_types::Usage;
use crate::tools::{EventStatus, Invocation};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Completions that parsed into a usable response.
    pub tasks_succeeded: u64,
    /// Completions without a recognizable `choices` structure, or model
    /// calls that exhausted their retries.
    pub tasks_failed: u64,
    /// Model call attempts, retries included.
    pub model_calls: u64,
    pub actions_completed: u64,
    pub actions_failed: u64,
    pub extensions: u64,
    /// Token usage summed over every completion that reported it.
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocations(&mut self, invocations: &[Invocation]) {
        for invocation in invocations {
            match invocation.status() {
                EventStatus::Completed => self.actions_completed += 1,
                EventStatus::Failed => self.actions_failed += 1,
                EventStatus::Pending => {}
            }
        }
    }

    pub fn record_usage(&mut self, usage: &Usage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::tools::{Invocable, Tool, ToolRegistry};
    use serde_json::{json, Map};

    #[tokio::test]
    async fn test_record_invocations_counts_by_status() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Tool::new("ok", "Succeeds", Invocable::native(|_| async { Ok(json!(1)) })))
            .unwrap();
        registry
            .register(Tool::new(
                "bad",
                "Fails",
                Invocable::native(|_| async { Err(AgentError::ExecutionError("no".into())) }),
            ))
            .unwrap();

        let invocations = vec![
            registry.invoke("ok", Map::new()).await.unwrap(),
            registry.invoke("bad", Map::new()).await.unwrap(),
            registry.invoke("ok", Map::new()).await.unwrap(),
        ];

        let mut metrics = SessionMetrics::new();
        metrics.record_invocations(&invocations);
        assert_eq!(metrics.actions_completed, 2);
        assert_eq!(metrics.actions_failed, 1);

        metrics.reset();
        assert_eq!(metrics, SessionMetrics::default());
    }

    #[test]
    fn test_record_usage_accumulates() {
        let usage = Usage {
            prompt_tokens: 12,
            completion_tokens: 3,
            total_tokens: 15,
        };
        let mut metrics = SessionMetrics::new();
        metrics.record_usage(&usage);
        metrics.record_usage(&usage);

        assert_eq!(metrics.prompt_tokens, 24);
        assert_eq!(metrics.completion_tokens, 6);
        assert_eq!(metrics.total_tokens, 30);
    }
}
