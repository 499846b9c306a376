//! Callable capabilities behind a tool, and the hooks around them

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client;

use crate::errors::AgentError;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, AgentError>> + Send>>;
pub type NativeFn = Arc<dyn Fn(Map<String, Value>) -> ToolFuture + Send + Sync>;
pub type BlockingFn = Arc<dyn Fn(Map<String, Value>) -> Result<Value, AgentError> + Send + Sync>;

#[derive(Clone)]
pub enum Invocable {
    /// Async function awaited on the caller's task.
    Native(NativeFn),
    /// Synchronous function run on the blocking worker pool.
    Blocking(BlockingFn),
    /// HTTP endpoint receiving the arguments as a JSON body.
    Remote {
        url: String,
        headers: HashMap<String, String>,
        client: Client,
    },
}

impl fmt::Debug for Invocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocable::Native(_) => f.write_str("Native"),
            Invocable::Blocking(_) => f.write_str("Blocking"),
            Invocable::Remote { url, .. } => f.debug_struct("Remote").field("url", url).finish(),
        }
    }
}

impl Invocable {
    pub fn native<F, Fut>(func: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        Invocable::Native(Arc::new(move |arguments: Map<String, Value>| {
            Box::pin(func(arguments)) as ToolFuture
        }))
    }

    pub fn blocking<F>(func: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Value, AgentError> + Send + Sync + 'static,
    {
        Invocable::Blocking(Arc::new(func))
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Invocable::Remote {
            url: url.into(),
            headers: HashMap::new(),
            client: Client::new(),
        }
    }

    pub fn remote_with_headers(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Invocable::Remote {
            url: url.into(),
            headers,
            client: Client::new(),
        }
    }

    pub async fn call(&self, arguments: Map<String, Value>) -> Result<Value, AgentError> {
        match self {
            Invocable::Native(func) => func(arguments).await,
            Invocable::Blocking(func) => {
                let func = func.clone();
                tokio::task::spawn_blocking(move || func(arguments))
                    .await
                    .map_err(|e| AgentError::ExecutionError(format!("Blocking tool worker failed: {}", e)))?
            }
            Invocable::Remote {
                url,
                headers,
                client,
            } => {
                let mut request = client.post(url).json(&Value::Object(arguments));
                for (name, value) in headers {
                    request = request.header(name.as_str(), value.as_str());
                }

                let response = request.send().await.map_err(|e| {
                    AgentError::ExecutionError(format!("Request to remote tool {} failed: {}", url, e))
                })?;

                let status = response.status();
                let body = response.text().await.map_err(|e| {
                    AgentError::ExecutionError(format!("Failed to read remote tool response: {}", e))
                })?;

                if !status.is_success() {
                    return Err(AgentError::ExecutionError(format!(
                        "Remote tool returned status {}: {}",
                        status, body
                    )));
                }

                Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
            }
        }
    }
}

type HookFn = Arc<dyn Fn(Value, Map<String, Value>) -> ToolFuture + Send + Sync>;

/// Pre- or post-processing step with its own keyword configuration.
#[derive(Clone)]
pub struct Hook {
    func: HookFn,
    kwargs: Map<String, Value>,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("kwargs", &self.kwargs).finish()
    }
}

impl Hook {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Value, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |value: Value, kwargs: Map<String, Value>| {
                Box::pin(func(value, kwargs)) as ToolFuture
            }),
            kwargs: Map::new(),
        }
    }

    pub fn sync<F>(func: F) -> Self
    where
        F: Fn(Value, &Map<String, Value>) -> Result<Value, AgentError> + Send + Sync + 'static,
    {
        Self::new(move |value, kwargs| {
            let result = func(value, &kwargs);
            async move { result }
        })
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    pub async fn apply(&self, value: Value) -> Result<Value, AgentError> {
        (self.func)(value, self.kwargs.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_native_and_blocking_variants() {
        let native = Invocable::native(|arguments| async move {
            Ok(json!(arguments.len()))
        });
        let blocking = Invocable::blocking(|arguments| Ok(json!(arguments.contains_key("x"))));

        let mut arguments = Map::new();
        arguments.insert("x".into(), json!(1));

        assert_eq!(native.call(arguments.clone()).await.unwrap(), json!(1));
        assert_eq!(blocking.call(arguments).await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_hook_receives_kwargs() {
        let mut kwargs = Map::new();
        kwargs.insert("suffix".into(), json!("!"));
        let hook = Hook::sync(|value, kwargs| {
            let suffix = kwargs.get("suffix").and_then(Value::as_str).unwrap_or_default();
            Ok(json!(format!("{}{}", value.as_str().unwrap_or_default(), suffix)))
        })
        .with_kwargs(kwargs);

        assert_eq!(hook.apply(json!("done")).await.unwrap(), json!("done!"));
    }
}
