use async_trait::async_trait;
use loom_core::branch::MessageContent;
use loom_core::errors::AgentError;
use loom_core::llm::{build_payload, ChatMessage, ModelEndpoint};
use loom_core::{ChatRequest, DirectiveSettings, EventStatus, Form, Invocable, Session, Tool, ToolParameter};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct ScriptedModel {
    responses: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<Value>>>,
    default_response: String,
}

impl ScriptedModel {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: "OK".to_string(),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelEndpoint for ScriptedModel {
    async fn call(
        &self,
        messages: &[ChatMessage],
        config: &Map<String, Value>,
    ) -> Result<(Value, Value), AgentError> {
        let payload = build_payload(messages, config)?;
        self.requests.lock().unwrap().push(payload.clone());

        let mut responses = self.responses.lock().unwrap();
        let content = if responses.is_empty() {
            self.default_response.clone()
        } else {
            responses.remove(0)
        };
        let completion = json!({
            "id": "chatcmpl-test",
            "model": "scripted",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": content}
            }]
        });
        Ok((payload, completion))
    }
}

fn lookup_tool() -> Tool {
    Tool::new(
        "lookup",
        "Looks up a city's population in millions",
        Invocable::native(|args: Map<String, Value>| async move {
            match args.get("city").and_then(Value::as_str) {
                Some("Paris") => Ok(json!(2.1)),
                Some("Lyon") => Ok(json!(0.5)),
                _ => Err(AgentError::ExecutionError("unknown city".to_string())),
            }
        }),
    )
    .with_parameter(ToolParameter::required("city", "string", "City name"))
}

fn sleeper(name: &str, millis: u64) -> Tool {
    Tool::new(
        name,
        "Sleeps, then reports its name",
        Invocable::native(move |_| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!(millis))
        }),
    )
}

#[tokio::test]
async fn test_direct_with_actions_then_extension() {
    let first = json!({
        "answer": "PLEASE_ACTION",
        "action_required": true,
        "actions": [
            {"function": "lookup", "arguments": {"city": "Paris"}},
            {"function": "lookup", "arguments": {"city": "Lyon"}}
        ],
        "extension_required": true,
        "plan": ["compare the populations"]
    })
    .to_string();
    let second = json!({"answer": "Paris is larger", "extension_required": false}).to_string();
    let model = ScriptedModel::new(vec![first, second]);

    let mut session = Session::new(Arc::new(model.clone()));
    session.register_tool(lookup_tool()).unwrap();

    let form = Form::new("Which city is larger, Paris or Lyon?")
        .allow_action()
        .plan(2)
        .allow_extension(Some(2));
    let form = session.direct(form).await.unwrap();

    assert!(form.action_performed);
    assert_eq!(form.action_responses.len(), 2);
    assert_eq!(form.action_responses[0]["output"], 2.1);
    assert_eq!(form.action_responses[1]["output"], 0.5);
    assert_eq!(form.extension_forms.len(), 1);
    assert_eq!(form.extension_forms[0].instruction, "step_1: compare the populations");
    assert_eq!(form.final_answer(), Some(&json!("Paris is larger")));
    // The last answer is not the sentinel, so no follow-up turn is made.
    assert_eq!(model.request_count(), 2);

    let metrics = session.metrics();
    assert_eq!(metrics.tasks_succeeded, 2);
    assert_eq!(metrics.actions_completed, 2);
    assert_eq!(metrics.extensions, 1);
}

#[tokio::test]
async fn test_extension_budget_terminates() {
    let always = json!({"answer": "not yet", "extension_required": true}).to_string();
    let model = ScriptedModel::new(vec![always; 20]);
    let mut session = Session::new(Arc::new(model.clone()));

    let form = session
        .direct(Form::new("Never finish").allow_extension(Some(2)))
        .await
        .unwrap();

    assert_eq!(form.extension_forms.len(), 2);
    assert_eq!(model.request_count(), 3);
}

#[tokio::test]
async fn test_default_extension_budget_comes_from_settings() {
    let always = json!({"answer": "not yet", "extension_required": true}).to_string();
    let model = ScriptedModel::new(vec![always; 20]);
    let mut session = Session::new(Arc::new(model.clone())).with_settings(DirectiveSettings {
        max_extension: 1,
        ..DirectiveSettings::default()
    });

    let form = session
        .direct(Form::new("Never finish").allow_extension(None))
        .await
        .unwrap();

    assert_eq!(form.extension_forms.len(), 1);
}

#[tokio::test]
async fn test_responses_follow_request_order() {
    let reply = json!([
        {"function": "slow", "arguments": {}},
        {"function": "fast", "arguments": {}},
        {"function": "medium", "arguments": {}}
    ])
    .to_string();
    let model = ScriptedModel::new(vec![reply]);
    let mut session = Session::new(Arc::new(model));
    session.register_tool(sleeper("slow", 80)).unwrap();
    session.register_tool(sleeper("medium", 40)).unwrap();
    session.register_tool(sleeper("fast", 1)).unwrap();

    let response = session
        .chat(ChatRequest::new("Run all three").with_tools(true))
        .await
        .unwrap();
    assert!(response.actions_handled());

    let order: Vec<(bool, String)> = session
        .branch()
        .messages()
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::ActionRequest { function, .. } => Some((false, function.clone())),
            MessageContent::ActionResponse { function, .. } => Some((true, function.clone())),
            _ => None,
        })
        .collect();
    let expected: Vec<(bool, String)> = [false, true]
        .iter()
        .flat_map(|is_response| {
            ["slow", "fast", "medium"]
                .iter()
                .map(move |name| (*is_response, name.to_string()))
        })
        .collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_strict_tool_never_runs_with_missing_fields() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let strict = Tool::new(
        "strict_echo",
        "Echoes its input",
        Invocable::native(move |args: Map<String, Value>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Value::Object(args)) }
        }),
    )
    .with_parameter(ToolParameter::required("text", "string", "Text to echo"))
    .with_parameter(ToolParameter::optional("upper", "boolean", "Uppercase", json!(false)))
    .strict(true);
    let lenient = Tool::new(
        "lenient_echo",
        "Echoes its input",
        Invocable::native(|args: Map<String, Value>| async move { Ok(Value::Object(args)) }),
    )
    .with_parameter(ToolParameter::required("text", "string", "Text to echo"));

    let reply = json!([
        {"function": "strict_echo", "arguments": {"upper": true}},
        {"function": "lenient_echo", "arguments": {"text": "hi", "extra": 1}}
    ])
    .to_string();
    let mut session = Session::new(Arc::new(ScriptedModel::new(vec![reply])));
    session.register_tool(strict).unwrap();
    session.register_tool(lenient).unwrap();

    let response = session
        .chat(ChatRequest::new("echo").with_tools(true))
        .await
        .unwrap();

    let statuses: Vec<EventStatus> = response.invocations().iter().map(|i| i.status()).collect();
    assert_eq!(statuses, vec![EventStatus::Failed, EventStatus::Completed]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.invocations()[1].response().unwrap()["extra"], 1);
    assert_eq!(session.metrics().actions_failed, 1);
}

#[tokio::test]
async fn test_unknown_tool_aborts_turn_without_partial_records() {
    let reply = json!([
        {"function": "lookup", "arguments": {"city": "Paris"}},
        {"function": "missing", "arguments": {}}
    ])
    .to_string();
    let mut session = Session::new(Arc::new(ScriptedModel::new(vec![reply])));
    session.register_tool(lookup_tool()).unwrap();

    let err = session
        .chat(ChatRequest::new("look up").with_tools(true))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("act"));
    assert_eq!(session.branch().action_responses().count(), 0);
    assert!(session
        .branch()
        .messages()
        .iter()
        .all(|m| !matches!(m.content, MessageContent::ActionRequest { .. })));
}
