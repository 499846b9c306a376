//! Lenient extraction of structured data from model text
//!
//! Models wrap JSON in fenced code blocks, use single quotes, leave trailing
//! commas and sometimes stop before closing their braces. These helpers
//! repair what they can and fold the result onto an expected key set.

use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::AgentError;

/// Minimum similarity for a key to be matched to an expected one.
const KEY_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Bodies of the fenced code blocks tagged with `language`.
pub fn extract_code_blocks(text: &str, language: &str) -> Vec<String> {
    let pattern = format!(r"(?s)```\s*{}\s*\n?(.*?)```", regex::escape(language));
    match Regex::new(&pattern) {
        Ok(re) => re
            .captures_iter(text)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn replace_all(re: &str, text: &str, replacement: &str) -> String {
    match Regex::new(re) {
        Ok(re) => re.replace_all(text, replacement).into_owned(),
        Err(_) => text.to_string(),
    }
}

fn repair_json(text: &str) -> String {
    let mut fixed = text.trim().to_string();
    if !fixed.contains('"') {
        fixed = fixed.replace('\'', "\"");
    }
    fixed = replace_all(r",\s*([}\]])", &fixed, "$1");
    fixed = replace_all(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#, &fixed, "$1\"$2\":");
    fixed = replace_all(r"\bTrue\b", &fixed, "true");
    fixed = replace_all(r"\bFalse\b", &fixed, "false");
    replace_all(r"\bNone\b", &fixed, "null")
}

fn close_brackets(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut closed = text.to_string();
    if in_string {
        closed.push('"');
    }
    while let Some(closer) = stack.pop() {
        closed.push(closer);
    }
    closed
}

/// Parses `text` as JSON, repairing common model mistakes when the strict
/// parse fails.
pub fn fuzzy_parse_json(text: &str) -> Result<Value, AgentError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let repaired = repair_json(trimmed);
    if let Ok(value) = serde_json::from_str(&repaired) {
        return Ok(value);
    }

    let closed = close_brackets(&repaired);
    serde_json::from_str(&closed).map_err(|e| {
        AgentError::ParsingError(format!("Could not parse JSON from model output: {}", e))
    })
}

/// Every JSON value recoverable from `text`: the whole text if it parses,
/// otherwise each parsable ```json block.
pub fn extract_json_values(text: &str) -> Vec<Value> {
    if let Ok(value) = fuzzy_parse_json(text) {
        return vec![value];
    }
    extract_code_blocks(text, "json")
        .iter()
        .filter_map(|block| fuzzy_parse_json(block).ok())
        .collect()
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j] + cost)
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}

/// Normalised edit similarity in `[0, 1]`.
pub fn key_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize_key(a).chars().collect();
    let b: Vec<char> = normalize_key(b).chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn match_key<'a>(key: &str, expected: &[&'a str], taken: &[&str]) -> Option<&'a str> {
    if let Some(exact) = expected.iter().find(|k| **k == key && !taken.contains(k)) {
        return Some(exact);
    }

    let normalized = normalize_key(key);
    if let Some(loose) = expected
        .iter()
        .find(|k| normalize_key(k) == normalized && !taken.contains(k))
    {
        return Some(loose);
    }

    expected
        .iter()
        .filter(|k| !taken.contains(k))
        .map(|k| (*k, key_similarity(key, k)))
        .filter(|(_, score)| *score >= KEY_SIMILARITY_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(k, _)| k)
}

/// Folds `input` onto exactly the `expected` keys: near-miss keys are
/// renamed, unknown keys dropped and missing keys filled with `null`.
pub fn force_validate_mapping(input: &Map<String, Value>, expected: &[&str]) -> Map<String, Value> {
    let mut output = Map::new();
    let mut taken: Vec<&str> = Vec::new();

    // Exact keys claim their slot before fuzzy matches are considered.
    for key in expected {
        if let Some(value) = input.get(*key) {
            output.insert(key.to_string(), value.clone());
            taken.push(key);
        }
    }

    for (key, value) in input {
        if expected.contains(&key.as_str()) {
            continue;
        }
        match match_key(key, expected, &taken) {
            Some(target) => {
                output.insert(target.to_string(), value.clone());
                taken.push(target);
            }
            None => log::debug!("Dropping unexpected key '{}'", key),
        }
    }

    for key in expected {
        output.entry(key.to_string()).or_insert(Value::Null);
    }
    output
}

/// Recovers a mapping with the `expected` keys from model text, or `None`
/// when nothing structured can be found.
pub fn process_model_response(content: &str, expected: &[&str]) -> Option<Map<String, Value>> {
    extract_json_values(content).into_iter().find_map(|value| match value {
        Value::Object(map) => Some(force_validate_mapping(&map, expected)),
        Value::Array(items) => items.into_iter().find_map(|item| match item {
            Value::Object(map) => Some(force_validate_mapping(&map, expected)),
            _ => None,
        }),
        _ => None,
    })
}

/// Normalises a list (or a single object) of entries into an
/// `{prefix}_1, {prefix}_2, ...` mapping.
pub fn enumerate_as_mapping(value: &Value, prefix: &str) -> Map<String, Value> {
    let entries: Vec<Value> = match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => {
            let numbered = map.keys().all(|k| k.starts_with(prefix));
            if numbered {
                return map.clone();
            }
            vec![value.clone()]
        }
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| (format!("{}_{}", prefix, i + 1), entry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fuzzy_parse_repairs_common_mistakes() {
        assert_eq!(fuzzy_parse_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(fuzzy_parse_json("{'a': 'x',}").unwrap(), json!({"a": "x"}));
        assert_eq!(fuzzy_parse_json("{a: True, b: None}").unwrap(), json!({"a": true, "b": null}));
        assert_eq!(
            fuzzy_parse_json(r#"{"a": [1, 2, {"b": "c"#).unwrap(),
            json!({"a": [1, 2, {"b": "c"}]})
        );
        assert!(fuzzy_parse_json("no json here").is_err());
    }

    #[test]
    fn test_extract_json_from_fenced_block() {
        let text = "Sure!\n```json\n{\"answer\": \"42\"}\n```\nAnything else?";
        assert_eq!(extract_json_values(text), vec![json!({"answer": "42"})]);
        assert_eq!(extract_code_blocks("```python\nx = 1\n```", "python"), vec!["x = 1"]);
    }

    #[test]
    fn test_force_validate_mapping() {
        let input = json!({"Answer": "yes", "reasonn": "because", "junk": 1});
        let validated = force_validate_mapping(input.as_object().unwrap(), &["answer", "reason", "score"]);

        assert_eq!(validated.len(), 3);
        assert_eq!(validated["answer"], "yes");
        assert_eq!(validated["reason"], "because");
        assert_eq!(validated["score"], Value::Null);
        assert!(!validated.contains_key("junk"));
    }

    #[test]
    fn test_process_model_response_falls_back_to_none() {
        assert!(process_model_response("plain prose", &["answer"]).is_none());
        let parsed = process_model_response("```json\n{\"answer\": 3}\n```", &["answer"]).unwrap();
        assert_eq!(parsed["answer"], 3);
    }

    #[test]
    fn test_enumerate_as_mapping() {
        let mapped = enumerate_as_mapping(&json!(["a", "b"]), "step");
        assert_eq!(mapped["step_1"], "a");
        assert_eq!(mapped["step_2"], "b");

        let already = enumerate_as_mapping(&json!({"step_1": "x"}), "step");
        assert_eq!(already["step_1"], "x");
        assert!(enumerate_as_mapping(&Value::Null, "step").is_empty());
    }
}
