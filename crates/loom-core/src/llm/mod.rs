//! Model endpoint abstraction and the HTTP chat-completions adapter.
//!
//! The directive loop only needs one operation from a model: send the chat
//! messages with a request configuration and get back the exact payload
//! that was sent together with the raw completion.

pub use crate::core_types::{ChatMessage, Role};
use crate::config::ModelSettings;
use crate::errors::AgentError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub mod response_parser;

pub use response_parser::{ParsedCompletion, ResponseParser};

#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Returns `(request_payload, response_payload)`.
    async fn call(
        &self,
        messages: &[ChatMessage],
        config: &Map<String, Value>,
    ) -> Result<(Value, Value), AgentError>;
}

/// Builds the request body: `config` fields plus the `messages` array.
pub fn build_payload(messages: &[ChatMessage], config: &Map<String, Value>) -> Result<Value, AgentError> {
    let mut payload = config.clone();
    payload.insert("messages".to_string(), serde_json::to_value(messages)?);
    Ok(Value::Object(payload))
}

pub struct HttpModelEndpoint {
    pub endpoint_url: String,
    api_key: Option<String>,
    headers: HashMap<String, String>,
    client: Client,
}

impl HttpModelEndpoint {
    pub fn new(endpoint_url: String) -> Self {
        Self {
            endpoint_url,
            api_key: None,
            headers: HashMap::new(),
            client: Client::new(),
        }
    }

    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self {
            endpoint_url: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            headers: settings.headers.clone(),
            client: Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl ModelEndpoint for HttpModelEndpoint {
    async fn call(
        &self,
        messages: &[ChatMessage],
        config: &Map<String, Value>,
    ) -> Result<(Value, Value), AgentError> {
        let payload = build_payload(messages, config)?;

        let request_url = format!("{}/v1/chat/completions", self.endpoint_url);
        log::debug!(
            "HttpModelEndpoint sending {} messages to {}",
            messages.len(),
            request_url
        );

        let mut request = self.client.post(&request_url).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        match request.send().await {
            Ok(response) => {
                if response.status().is_success() {
                    match response.json::<Value>().await {
                        Ok(completion) => Ok((payload, completion)),
                        Err(e) => {
                            let err_msg = format!("Failed to parse model response JSON: {}", e);
                            log::error!("{}", err_msg);
                            Err(AgentError::ParsingError(err_msg))
                        }
                    }
                } else {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_else(|_| {
                        "Unknown error while reading error response body".to_string()
                    });
                    let err_msg = format!(
                        "Model API request failed with status {}: {}",
                        status, error_text
                    );
                    log::error!("{}", err_msg);
                    Err(AgentError::ModelError(err_msg))
                }
            }
            Err(e) => {
                let err_msg = format!("HTTP request to model endpoint failed: {}", e);
                log::error!("{}", err_msg);
                Err(AgentError::ModelError(err_msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{completion, MockModelServer};
    use axum::http::StatusCode;
    use serde_json::json;

    fn messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(Role::System, "Be brief."),
            ChatMessage::new(Role::User, "Hi"),
        ]
    }

    #[tokio::test]
    async fn test_http_endpoint_round_trip() {
        let server = MockModelServer::start(vec![Ok(completion("Hello!"))]).await;
        let endpoint = HttpModelEndpoint::new(server.address()).with_api_key("test-key");
        let mut config = Map::new();
        config.insert("model".to_string(), json!("mock-model"));

        let (payload, response) = endpoint.call(&messages(), &config).await.unwrap();

        assert_eq!(payload["model"], "mock-model");
        assert_eq!(payload["messages"][1]["role"], "user");
        assert_eq!(response["choices"][0]["message"]["content"], "Hello!");

        let requests = server.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], payload);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_http_endpoint_error_status() {
        let server = MockModelServer::start(vec![Err(StatusCode::INTERNAL_SERVER_ERROR)]).await;
        let endpoint = HttpModelEndpoint::new(server.address());

        let err = endpoint.call(&messages(), &Map::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::ModelError(msg) if msg.contains("500")));
        server.shutdown().await;
    }
}
