//! Structured task descriptors for directives
//!
//! A [`Form`] holds an instruction, the fields the model is asked to fill
//! and the values filled so far. Requested fields that have not been filled
//! read as `null`. Directive options such as `reason`, `plan` or
//! `allow_action` add requested fields and guidance text; the derived
//! `action_required` and `extension_required` flags are read back from the
//! filled values after every turn.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::actions::{ActionCall, ActionParser, JsonActionParser};
use crate::errors::AgentError;
use crate::parse::{enumerate_as_mapping, force_validate_mapping};
use crate::tools::Invocation;

/// Answer placeholder meaning "the answer depends on actions still pending".
pub const PENDING_ACTION_SENTINEL: &str = "PLEASE_ACTION";

pub const ANSWER_FIELD: &str = "answer";
pub const ACTION_REQUIRED_FIELD: &str = "action_required";
pub const ACTIONS_FIELD: &str = "actions";
pub const EXTENSION_REQUIRED_FIELD: &str = "extension_required";
pub const PLAN_FIELD: &str = "plan";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Form {
    pub id: Uuid,
    pub instruction: String,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub guidance: Vec<String>,
    requested_fields: Vec<String>,
    field_descriptions: Map<String, Value>,
    values: Map<String, Value>,
    #[serde(default)]
    pub allow_action: bool,
    #[serde(default)]
    pub allow_extension: bool,
    #[serde(default)]
    pub max_extension: Option<usize>,
    #[serde(default)]
    pub action_responses: Vec<Value>,
    #[serde(default)]
    pub action_performed: bool,
    #[serde(default)]
    pub extension_forms: Vec<Form>,
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => matches!(text.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn numbered_entries(map: &Map<String, Value>) -> Vec<(u64, &Value)> {
    let mut entries: Vec<(u64, &Value)> = map
        .iter()
        .map(|(key, value)| {
            let index = key
                .rsplit('_')
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(u64::MAX);
            (index, value)
        })
        .collect();
    entries.sort_by_key(|(index, _)| *index);
    entries
}

impl Form {
    pub fn new(instruction: impl Into<String>) -> Self {
        let mut form = Self {
            id: Uuid::new_v4(),
            instruction: instruction.into(),
            context: None,
            guidance: Vec::new(),
            requested_fields: Vec::new(),
            field_descriptions: Map::new(),
            values: Map::new(),
            allow_action: false,
            allow_extension: false,
            max_extension: None,
            action_responses: Vec::new(),
            action_performed: false,
            extension_forms: Vec::new(),
        };
        form.request_field(ANSWER_FIELD, "The final answer to the instruction, as a string.");
        form
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance.push(guidance.into());
        self
    }

    /// Adds `name` to the requested fields; re-requesting only updates the
    /// description.
    pub fn request_field(&mut self, name: &str, description: &str) {
        if !self.requested_fields.iter().any(|f| f == name) {
            self.requested_fields.push(name.to_string());
        }
        self.field_descriptions
            .insert(name.to_string(), Value::String(description.to_string()));
    }

    pub fn with_field(mut self, name: &str, description: &str) -> Self {
        self.request_field(name, description);
        self
    }

    pub fn reason(self) -> Self {
        self.with_field(
            "reason",
            "Explain the reasoning step by step before giving the answer.",
        )
    }

    pub fn predict(self, num_sentences: usize) -> Self {
        let description = format!(
            "Predict what happens next in {} sentence(s).",
            num_sentences.max(1)
        );
        self.with_field("prediction", &description)
    }

    pub fn score(self, range: (f64, f64), digits: usize) -> Self {
        let description = format!(
            "A numeric score between {} and {}, rounded to {} decimal place(s).",
            range.0, range.1, digits
        );
        self.with_field("score", &description)
    }

    pub fn select<S: AsRef<str>>(self, choices: &[S]) -> Self {
        let choices: Vec<&str> = choices.iter().map(AsRef::as_ref).collect();
        let description = format!("Exactly one of: {}.", choices.join(", "));
        self.with_field("selection", &description)
    }

    pub fn plan(self, num_steps: usize) -> Self {
        let description = format!(
            "The remaining steps to complete the instruction, at most {}, as a list of strings in execution order.",
            num_steps.max(1)
        );
        self.with_field(PLAN_FIELD, &description)
    }

    pub fn confidence(self) -> Self {
        self.with_field(
            "confidence_score",
            "Your confidence in the answer, a number between 0 and 1.",
        )
    }

    pub fn allow_action(mut self) -> Self {
        self.allow_action = true;
        self.request_field(
            ACTION_REQUIRED_FIELD,
            "true if tools from the provided schemas must be called before answering, otherwise false.",
        );
        self.request_field(
            ACTIONS_FIELD,
            "List of {\"function\": name, \"arguments\": {..}} objects to call. Only use functions and argument names from the provided tool schemas.",
        );
        self.guidance.push(format!(
            "If the answer depends on actions that have not run yet, set answer to \"{}\".",
            PENDING_ACTION_SENTINEL
        ));
        self
    }

    /// Allows up to `max` extension turns; `None` uses the engine default.
    pub fn allow_extension(mut self, max: Option<usize>) -> Self {
        self.allow_extension = true;
        self.max_extension = max;
        self.request_field(
            EXTENSION_REQUIRED_FIELD,
            "true if the task needs further steps before it is complete, otherwise false.",
        );
        self
    }

    pub fn requested_fields(&self) -> &[String] {
        &self.requested_fields
    }

    /// Requested fields with their current values; unfilled ones are `null`.
    pub fn work_fields(&self) -> Map<String, Value> {
        self.requested_fields
            .iter()
            .map(|f| (f.clone(), self.values.get(f).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// Requested fields with their descriptions, for the instruction.
    pub fn output_fields(&self) -> Map<String, Value> {
        self.requested_fields
            .iter()
            .map(|f| {
                (
                    f.clone(),
                    self.field_descriptions.get(f).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    pub fn guidance_text(&self) -> Option<String> {
        if self.guidance.is_empty() {
            None
        } else {
            Some(self.guidance.join(" "))
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field).filter(|v| !v.is_null())
    }

    pub fn is_filled(&self) -> bool {
        self.requested_fields.iter().all(|f| self.get(f).is_some())
    }

    /// Folds a validated response into the form. Only requested fields are
    /// kept and `null` values never overwrite what is already filled.
    pub fn fill(&mut self, response: &Map<String, Value>) {
        let keys: Vec<&str> = self.requested_fields.iter().map(String::as_str).collect();
        let validated = force_validate_mapping(response, &keys);

        for (key, value) in validated {
            if value.is_null() {
                continue;
            }
            let value = match key.as_str() {
                ACTIONS_FIELD => Value::Object(enumerate_as_mapping(&value, "action")),
                PLAN_FIELD => Value::Object(enumerate_as_mapping(&value, "step")),
                _ => value,
            };
            self.values.insert(key, value);
        }
    }

    /// Uses unstructured model text as the answer.
    pub fn fill_raw(&mut self, content: &str) {
        self.values
            .insert(ANSWER_FIELD.to_string(), Value::String(content.to_string()));
    }

    pub fn set_answer(&mut self, answer: Value) {
        self.values.insert(ANSWER_FIELD.to_string(), answer);
    }

    pub fn answer(&self) -> Option<&Value> {
        self.get(ANSWER_FIELD)
    }

    /// Answer of the last extension form, or this form's own answer.
    pub fn final_answer(&self) -> Option<&Value> {
        self.extension_forms
            .iter()
            .rev()
            .find_map(Form::answer)
            .or_else(|| self.answer())
    }

    pub fn answer_is_pending_action(&self) -> bool {
        matches!(self.answer(), Some(Value::String(s)) if s.trim() == PENDING_ACTION_SENTINEL)
    }

    pub fn action_required(&self) -> bool {
        self.allow_action
            && is_truthy(self.values.get(ACTION_REQUIRED_FIELD))
            && matches!(self.get(ACTIONS_FIELD), Some(Value::Object(map)) if !map.is_empty())
    }

    pub fn extension_required(&self) -> bool {
        self.allow_extension && is_truthy(self.values.get(EXTENSION_REQUIRED_FIELD))
    }

    /// Requested actions in `action_1, action_2, ...` order.
    pub fn actions(&self) -> Result<Vec<ActionCall>, AgentError> {
        let Some(Value::Object(actions)) = self.get(ACTIONS_FIELD) else {
            return Ok(Vec::new());
        };

        let parser = JsonActionParser::new();
        let mut calls = Vec::with_capacity(actions.len());
        for (_, entry) in numbered_entries(actions) {
            match parser.parse(entry) {
                Some(parsed) => calls.extend(parsed),
                None => {
                    return Err(AgentError::MalformedAction(format!(
                        "cannot read an action from {}",
                        entry
                    )))
                }
            }
        }
        Ok(calls)
    }

    /// Planned steps in `step_1, step_2, ...` order.
    pub fn plan_steps(&self) -> Vec<String> {
        match self.get(PLAN_FIELD) {
            Some(Value::Object(steps)) => numbered_entries(steps)
                .into_iter()
                .map(|(_, step)| match step {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn record_actions(&mut self, invocations: &[Invocation]) {
        if invocations.is_empty() {
            return;
        }
        self.action_responses
            .extend(invocations.iter().map(Invocation::to_response_content));
        self.action_performed = true;
    }

    /// A follow-up form for one extension step. It keeps this form's
    /// requested fields and options, and carries the original instruction and
    /// the answer so far as context.
    pub fn extension_form(&self, step: &str, index: usize) -> Form {
        let mut context = Map::new();
        context.insert("original_instruction".into(), json!(self.instruction));
        if let Some(context_value) = &self.context {
            context.insert("original_context".into(), context_value.clone());
        }
        if let Some(answer) = self.final_answer() {
            context.insert("answer_so_far".into(), answer.clone());
        }
        if !self.action_responses.is_empty() {
            context.insert("action_responses".into(), json!(self.action_responses));
        }

        Form {
            id: Uuid::new_v4(),
            instruction: format!("step_{}: {}", index, step),
            context: Some(Value::Object(context)),
            guidance: self.guidance.clone(),
            requested_fields: self.requested_fields.clone(),
            field_descriptions: self.field_descriptions.clone(),
            values: Map::new(),
            allow_action: self.allow_action,
            allow_extension: self.allow_extension,
            max_extension: self.max_extension,
            action_responses: Vec::new(),
            action_performed: false,
            extension_forms: Vec::new(),
        }
    }
}
