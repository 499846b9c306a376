// src/test_utils/mock_model.rs
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::errors::AgentError;
use crate::llm::{build_payload, ChatMessage, ModelEndpoint};

/// In-process model endpoint that replays scripted completions and records
/// every payload it was sent.
pub struct MockModel {
    responses: Mutex<VecDeque<Result<Value, AgentError>>>,
    requests: Mutex<Vec<Value>>,
}

impl MockModel {
    pub fn new(responses: Vec<Result<Value, AgentError>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every reply is a completion with `content`.
    pub fn replying(contents: &[&str]) -> Self {
        Self::new(contents.iter().map(|c| Ok(completion(c))).collect())
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelEndpoint for MockModel {
    async fn call(
        &self,
        messages: &[ChatMessage],
        config: &Map<String, Value>,
    ) -> Result<(Value, Value), AgentError> {
        let payload = build_payload(messages, config)?;
        self.requests.lock().unwrap().push(payload.clone());

        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok((payload, response)),
            Some(Err(err)) => Err(err),
            None => Err(AgentError::ModelError("mock model ran out of responses".to_string())),
        }
    }
}

/// A chat-completions body whose single choice carries `content`.
pub fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-mock",
        "model": "mock-model",
        "choices": [{
            "index": 0,
            "finish_reason": "stop",
            "message": { "role": "assistant", "content": content }
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
}

/// A completion that requests native tool calls.
pub fn tool_call_completion(calls: &[(&str, Value)]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .enumerate()
        .map(|(i, (name, arguments))| {
            json!({
                "id": format!("call_{}", i),
                "type": "function",
                "function": { "name": name, "arguments": arguments.to_string() }
            })
        })
        .collect();

    json!({
        "id": "chatcmpl-mock",
        "model": "mock-model",
        "choices": [{
            "index": 0,
            "finish_reason": "tool_calls",
            "message": { "role": "assistant", "content": null, "tool_calls": tool_calls }
        }]
    })
}
