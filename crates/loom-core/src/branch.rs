//! Conversation state for one line of interaction
//!
//! A [`Branch`] is an ordered log of messages. Order is causal: an action
//! request always precedes its response. The directive loop only appends;
//! `clear` and `set_system` are left to the owner. All mutation goes through
//! `&mut self`, which gives the single-writer discipline for free on one
//! task; share a branch across tasks only behind a lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::core_types::{ChatMessage, Role};
use crate::tools::{EventStatus, Invocation};

pub const SYSTEM_SENDER: &str = "system";
pub const USER_SENDER: &str = "user";
pub const ASSISTANT_SENDER: &str = "assistant";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    System {
        text: String,
    },
    Instruction {
        instruction: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guidance: Option<String>,
        /// Fields the model is asked to return, with their descriptions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_fields: Option<Map<String, Value>>,
    },
    AssistantResponse {
        text: String,
    },
    ActionRequest {
        function: String,
        arguments: Map<String, Value>,
    },
    ActionResponse {
        request_id: Uuid,
        function: String,
        arguments: Map<String, Value>,
        output: Value,
        status: EventStatus,
    },
}

impl MessageContent {
    pub fn role(&self) -> Role {
        match self {
            MessageContent::System { .. } => Role::System,
            MessageContent::Instruction { .. } | MessageContent::ActionResponse { .. } => Role::User,
            MessageContent::AssistantResponse { .. } | MessageContent::ActionRequest { .. } => {
                Role::Assistant
            }
        }
    }

    /// Text sent to the model for this message.
    pub fn render(&self) -> String {
        match self {
            MessageContent::System { text } | MessageContent::AssistantResponse { text } => text.clone(),
            MessageContent::Instruction {
                instruction,
                context,
                guidance,
                output_fields,
            } => {
                let mut body = Map::new();
                body.insert("instruction".into(), json!(instruction));
                if let Some(context) = context {
                    body.insert("context".into(), context.clone());
                }
                if let Some(guidance) = guidance {
                    body.insert("guidance".into(), json!(guidance));
                }
                if let Some(fields) = output_fields {
                    body.insert(
                        "response_format".into(),
                        json!({
                            "notice": "Return a JSON object inside a ```json code block with exactly these fields",
                            "fields": fields,
                        }),
                    );
                }
                Value::Object(body).to_string()
            }
            MessageContent::ActionRequest { function, arguments } => json!({
                "action_request": { "function": function, "arguments": arguments }
            })
            .to_string(),
            MessageContent::ActionResponse {
                function,
                arguments,
                output,
                ..
            } => json!({
                "action_response": { "function": function, "arguments": arguments, "output": output }
            })
            .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchMessage {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub sender: String,
    pub recipient: String,
    pub content: MessageContent,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl BranchMessage {
    pub fn new(content: MessageContent, sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            sender: sender.into(),
            recipient: recipient.into(),
            content,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.content.role(), self.content.render())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    messages: Vec<BranchMessage>,
}

impl Default for Branch {
    fn default() -> Self {
        Self::new()
    }
}

impl Branch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            messages: Vec::new(),
        }
    }

    pub fn with_system(text: impl Into<String>) -> Self {
        let mut branch = Self::new();
        branch.set_system(text);
        branch
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Identity used as sender of requests issued on this branch.
    pub fn requester(&self) -> String {
        self.id.to_string()
    }

    pub fn append(&mut self, message: BranchMessage) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn messages(&self) -> &[BranchMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&BranchMessage> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn system(&self) -> Option<&BranchMessage> {
        self.messages
            .first()
            .filter(|m| matches!(m.content, MessageContent::System { .. }))
    }

    /// Replaces the system message, which always sits at the head of the log.
    pub fn set_system(&mut self, text: impl Into<String>) {
        let message = BranchMessage::new(
            MessageContent::System { text: text.into() },
            SYSTEM_SENDER,
            self.requester(),
        );
        if self.system().is_some() {
            self.messages[0] = message;
        } else {
            self.messages.insert(0, message);
        }
    }

    pub fn add_instruction(
        &mut self,
        instruction: impl Into<String>,
        context: Option<Value>,
        guidance: Option<String>,
        output_fields: Option<Map<String, Value>>,
    ) -> Uuid {
        let recipient = self.requester();
        self.append(BranchMessage::new(
            MessageContent::Instruction {
                instruction: instruction.into(),
                context,
                guidance,
                output_fields,
            },
            USER_SENDER,
            recipient,
        ))
    }

    pub fn add_assistant_response(&mut self, text: impl Into<String>, metadata: Map<String, Value>) -> Uuid {
        self.append(
            BranchMessage::new(
                MessageContent::AssistantResponse { text: text.into() },
                ASSISTANT_SENDER,
                USER_SENDER,
            )
            .with_metadata(metadata),
        )
    }

    pub fn add_action_request(
        &mut self,
        function: impl Into<String>,
        arguments: Map<String, Value>,
        tool_id: Uuid,
    ) -> Uuid {
        let sender = self.requester();
        self.append(BranchMessage::new(
            MessageContent::ActionRequest {
                function: function.into(),
                arguments,
            },
            sender,
            tool_id.to_string(),
        ))
    }

    /// Records the outcome of `invocation` as the reply to `request_id`,
    /// sent by the tool back to the original requester.
    pub fn add_action_response(&mut self, request_id: Uuid, invocation: &Invocation) -> Uuid {
        let requester = self
            .messages
            .iter()
            .find(|m| m.id == request_id)
            .map(|m| m.sender.clone())
            .unwrap_or_else(|| self.requester());
        let content = invocation.to_response_content();

        let mut metadata = Map::new();
        metadata.insert("invocation_id".into(), json!(invocation.id()));
        if let Some(duration) = invocation.duration() {
            metadata.insert("duration".into(), json!(duration.as_secs_f64()));
        }
        if let Some(error) = invocation.error() {
            metadata.insert("error".into(), json!(error));
        }

        self.append(
            BranchMessage::new(
                MessageContent::ActionResponse {
                    request_id,
                    function: invocation.tool_name().to_string(),
                    arguments: invocation.arguments().clone(),
                    output: content["output"].clone(),
                    status: invocation.status(),
                },
                invocation.tool().id.to_string(),
                requester,
            )
            .with_metadata(metadata),
        )
    }

    /// Merges `metadata` into the most recent instruction message.
    pub fn update_last_instruction_meta(&mut self, metadata: Map<String, Value>) -> bool {
        match self
            .messages
            .iter_mut()
            .rev()
            .find(|m| matches!(m.content, MessageContent::Instruction { .. }))
        {
            Some(message) => {
                message.metadata.extend(metadata);
                true
            }
            None => false,
        }
    }

    pub fn action_responses(&self) -> impl Iterator<Item = &BranchMessage> {
        self.messages
            .iter()
            .filter(|m| matches!(m.content, MessageContent::ActionResponse { .. }))
    }

    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(BranchMessage::to_chat_message).collect()
    }
}
