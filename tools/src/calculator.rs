//! Integer arithmetic tools.

use serde::Deserialize;
use serde_json::json;

use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};

#[derive(Debug, Deserialize)]
struct Operands {
    a: i64,
    b: i64,
}

fn operand_schema(verb: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "a": { "type": "integer", "description": format!("First number to {verb}.") },
            "b": { "type": "integer", "description": format!("Second number to {verb}.") }
        },
        "required": ["a", "b"],
        "additionalProperties": false
    })
}

fn apply(
    tool: &str,
    args: &serde_json::Value,
    op: fn(i64, i64) -> Option<i64>,
) -> Result<String, ToolError> {
    let Operands { a, b } = parse_args(args)?;
    op(a, b)
        .map(|value| value.to_string())
        .ok_or_else(|| ToolError::ExecutionFailed {
            tool: tool.to_string(),
            message: format!("integer overflow for a={a}, b={b}"),
        })
}

#[derive(Debug, Default)]
pub struct AddTool;

impl ToolExecutor for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two integers."
    }

    fn schema(&self) -> serde_json::Value {
        operand_schema("add")
    }

    fn execute<'a>(&'a self, args: serde_json::Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move { apply(self.name(), &args, i64::checked_add) })
    }
}

#[derive(Debug, Default)]
pub struct MultiplyTool;

impl ToolExecutor for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply two integers."
    }

    fn schema(&self) -> serde_json::Value {
        operand_schema("multiply")
    }

    fn execute<'a>(&'a self, args: serde_json::Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move { apply(self.name(), &args, i64::checked_mul) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_multiply() {
        assert_eq!(apply("add", &json!({"a": 2, "b": 3}), i64::checked_add).unwrap(), "5");
        assert_eq!(
            apply("multiply", &json!({"a": -4, "b": 5}), i64::checked_mul).unwrap(),
            "-20"
        );
    }

    #[test]
    fn overflow_is_an_execution_error() {
        let err = apply("multiply", &json!({"a": i64::MAX, "b": 2}), i64::checked_mul).unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { tool, .. } if tool == "multiply"));
    }

    #[test]
    fn non_integer_is_bad_args() {
        let err = apply("add", &json!({"a": 1.5, "b": 2}), i64::checked_add).unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }
}
