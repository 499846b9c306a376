use crate::core_types::Usage;
use crate::errors::AgentError;
use serde_json::{Map, Value};

/// First choice of a chat-completions payload, split into what the branch
/// records and what the dispatcher inspects.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCompletion {
    /// The raw `message` object of the choice.
    pub message: Value,
    pub content: String,
    pub tool_calls: Vec<Value>,
    pub finish_reason: Option<String>,
    pub index: u64,
    pub usage: Option<Usage>,
    /// The completion minus `choices`, plus the choice's `finish_reason`
    /// and `index`.
    pub metadata: Map<String, Value>,
}

impl ParsedCompletion {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

pub struct ResponseParser;

impl ResponseParser {
    pub fn parse_completion(response: &Value) -> Result<ParsedCompletion, AgentError> {
        let choices = response["choices"]
            .as_array()
            .ok_or_else(|| AgentError::ParsingError("No choices in response".to_string()))?;

        let choice = choices
            .first()
            .ok_or_else(|| AgentError::ParsingError("Empty choices array".to_string()))?;

        let message = &choice["message"];
        if !message.is_object() {
            return Err(AgentError::ParsingError(
                "Choice has no message object".to_string(),
            ));
        }

        let content = message["content"].as_str().map(|s| s.to_string());
        let tool_calls = message["tool_calls"].as_array().cloned().unwrap_or_default();

        if content.is_none() && tool_calls.is_empty() {
            return Err(AgentError::ParsingError(
                "Response has neither content nor tool calls".to_string(),
            ));
        }

        let finish_reason = choice["finish_reason"].as_str().map(|s| s.to_string());
        let index = choice["index"].as_u64().unwrap_or(0);
        let usage = serde_json::from_value(response["usage"].clone()).ok();

        let mut metadata = response.as_object().cloned().unwrap_or_default();
        metadata.remove("choices");
        if let Some(reason) = &finish_reason {
            metadata.insert("finish_reason".to_string(), Value::String(reason.clone()));
        }
        metadata.insert("index".to_string(), Value::from(index));

        Ok(ParsedCompletion {
            message: message.clone(),
            content: content.unwrap_or_default(),
            tool_calls,
            finish_reason,
            index,
            usage,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_completion_with_content() {
        let response = json!({
            "id": "cmpl-1",
            "model": "test-model",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": { "role": "assistant", "content": "Hello, how can I help you?" }
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 7, "total_tokens": 10 }
        });

        let parsed = ResponseParser::parse_completion(&response).unwrap();
        assert_eq!(parsed.content, "Hello, how can I help you?");
        assert!(!parsed.has_tool_calls());
        assert_eq!(parsed.usage.unwrap().total_tokens, 10);
        assert_eq!(parsed.metadata["finish_reason"], "stop");
        assert_eq!(parsed.metadata["model"], "test-model");
        assert!(!parsed.metadata.contains_key("choices"));
    }

    #[test]
    fn test_parse_completion_with_tool_calls() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "calculator",
                            "arguments": "{\"operation\": \"add\", \"a\": 5, \"b\": 3}"
                        }
                    }]
                }
            }]
        });

        let parsed = ResponseParser::parse_completion(&response).unwrap();
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.tool_calls.len(), 1);
    }

    #[test]
    fn test_missing_structure_is_an_error() {
        assert!(ResponseParser::parse_completion(&json!({"error": "x"})).is_err());
        assert!(ResponseParser::parse_completion(&json!({"choices": []})).is_err());
        assert!(ResponseParser::parse_completion(&json!({"choices": [{"message": {}}]})).is_err());
    }
}
