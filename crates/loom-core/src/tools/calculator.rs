//! Arithmetic tool for quick numeric answers
//!
//! Evaluation is synchronous, so the tool runs on the blocking worker pool.

use serde_json::{json, Map, Value};

use crate::errors::AgentError;
use crate::tools::{Invocable, Tool, ToolParameter};

pub fn calculator_tool() -> Tool {
    Tool::new(
        "calculator",
        "Performs basic arithmetic operations including addition, subtraction, multiplication, division, exponentiation and square root",
        Invocable::blocking(evaluate),
    )
    .with_parameter(ToolParameter {
        name: "operation".to_string(),
        schema: json!({
            "type": "string",
            "enum": ["add", "subtract", "multiply", "divide", "power", "sqrt"],
            "description": "The arithmetic operation to perform"
        }),
        default: None,
    })
    .with_parameter(ToolParameter::required("a", "number", "The first number"))
    .with_parameter(ToolParameter::optional(
        "b",
        "number",
        "The second number (not required for sqrt)",
        Value::Null,
    ))
}

fn operand(arguments: &Map<String, Value>, name: &str, operation: &str) -> Result<f64, AgentError> {
    arguments.get(name).and_then(Value::as_f64).ok_or_else(|| {
        AgentError::ExecutionError(format!(
            "Missing or invalid parameter '{}' for {}",
            name, operation
        ))
    })
}

fn evaluate(arguments: Map<String, Value>) -> Result<Value, AgentError> {
    let operation = arguments
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::ExecutionError("Missing or invalid 'operation' parameter".to_string()))?;
    let a = operand(&arguments, "a", operation)?;

    let result = match operation {
        "add" => a + operand(&arguments, "b", operation)?,
        "subtract" => a - operand(&arguments, "b", operation)?,
        "multiply" => a * operand(&arguments, "b", operation)?,
        "divide" => {
            let b = operand(&arguments, "b", operation)?;
            if b == 0.0 {
                return Err(AgentError::ExecutionError(
                    "Division by zero is not allowed".to_string(),
                ));
            }
            a / b
        }
        "power" => a.powf(operand(&arguments, "b", operation)?),
        "sqrt" => {
            if a < 0.0 {
                return Err(AgentError::ExecutionError(
                    "Cannot calculate square root of negative number".to_string(),
                ));
            }
            a.sqrt()
        }
        other => {
            return Err(AgentError::ExecutionError(format!(
                "Unknown operation: {}",
                other
            )))
        }
    };

    log::debug!("calculator: {} {} = {}", operation, a, result);

    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Ok(json!(result as i64))
    } else {
        Ok(json!(result))
    }
}
