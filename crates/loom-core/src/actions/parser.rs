//! Extraction of action declarations from assistant messages
//!
//! Declarations arrive as native `tool_calls`, as JSON objects or arrays in
//! the message text, inside ```json or ```python fences, or wrapped in an
//! `action_requests` list. Keys are normalised before matching, so
//! `action_name`, `recipient_name`, `function` and `name` all mean the
//! function, and `parameters`, `args` and `arguments` all mean the
//! arguments.

use serde_json::{Map, Value};

use crate::actions::{ActionCall, ActionParser};
use crate::parse::{extract_code_blocks, extract_json_values, fuzzy_parse_json};

const FUNCTION_KEYS: [&str; 3] = ["name", "function", "recipient"];
const ARGUMENT_KEYS: [&str; 4] = ["parameter", "argument", "arg", "param"];
const WRAPPER_KEYS: [&str; 3] = ["action_requests", "actions", "tool_calls"];

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonActionParser;

fn normalize_key(key: &str) -> &str {
    let key = key.strip_prefix("action_").unwrap_or(key);
    let key = key.strip_prefix("recipient_").unwrap_or(key);
    key.strip_suffix('s').unwrap_or(key)
}

fn function_name(value: &Value) -> Option<String> {
    let name = value.as_str()?.trim();
    let name = name.strip_prefix("functions.").unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn arguments_map(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match fuzzy_parse_json(text).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        },
        Value::Null => Some(Map::new()),
        _ => None,
    }
}

impl JsonActionParser {
    pub fn new() -> Self {
        Self
    }

    fn declaration(object: &Map<String, Value>) -> Option<ActionCall> {
        let mut function = None;
        let mut arguments = None;

        for (key, value) in object {
            let key = normalize_key(key);
            if key == "function" {
                if let Value::Object(inner) = value {
                    // `{"function": {"name": .., "arguments": ..}}`
                    function = inner.get("name").and_then(function_name).or(function);
                    if let Some(inner_args) = inner.get("arguments").and_then(arguments_map) {
                        arguments.get_or_insert(inner_args);
                    }
                    continue;
                }
            }
            if FUNCTION_KEYS.contains(&key) {
                if let Some(name) = function_name(value) {
                    function = Some(name);
                }
            } else if ARGUMENT_KEYS.contains(&key) {
                if let Some(map) = arguments_map(value) {
                    arguments = Some(map);
                }
            }
        }

        Some(ActionCall {
            function: function?,
            arguments: arguments?,
        })
    }

    fn collect(value: &Value, out: &mut Vec<ActionCall>) {
        match value {
            Value::Array(items) => {
                for item in items {
                    Self::collect(item, out);
                }
            }
            Value::Object(object) => {
                let wrapped: Vec<&Value> = WRAPPER_KEYS
                    .iter()
                    .filter_map(|key| object.get(*key))
                    .collect();
                if wrapped.is_empty() {
                    out.extend(Self::declaration(object));
                    return;
                }
                for inner in wrapped {
                    match inner {
                        // `{"action_1": {...}, "action_2": {...}}`
                        Value::Object(numbered) if Self::declaration(numbered).is_none() => {
                            for entry in numbered.values() {
                                Self::collect(entry, out);
                            }
                        }
                        other => Self::collect(other, out),
                    }
                }
            }
            _ => {}
        }
    }

    fn parse_text(text: &str) -> Vec<ActionCall> {
        let mut calls = Vec::new();
        for value in extract_json_values(text) {
            Self::collect(&value, &mut calls);
        }
        if calls.is_empty() {
            for block in extract_code_blocks(text, "python") {
                if let Ok(value) = fuzzy_parse_json(&block) {
                    Self::collect(&value, &mut calls);
                }
            }
        }
        calls
    }
}

impl ActionParser for JsonActionParser {
    fn parse(&self, message: &Value) -> Option<Vec<ActionCall>> {
        let mut calls = Vec::new();
        match message {
            Value::String(text) => calls = Self::parse_text(text),
            Value::Object(object) => {
                if let Some(Value::Array(tool_calls)) = object.get("tool_calls") {
                    for call in tool_calls {
                        Self::collect(call, &mut calls);
                    }
                }
                if calls.is_empty() {
                    match object.get("content") {
                        Some(Value::String(text)) => calls = Self::parse_text(text),
                        Some(_) => {}
                        None => Self::collect(message, &mut calls),
                    }
                }
            }
            Value::Array(_) => Self::collect(message, &mut calls),
            _ => {}
        }

        if calls.is_empty() {
            None
        } else {
            Some(calls)
        }
    }
}
