use serde_json::Value;

use super::{ToolContext, ToolError, ToolHandler, str_arg};
use crate::core::expr::{evaluate, format_number};

/// `{expression}`: arithmetic over numbers, constants and a fixed set of
/// math functions. Runs in-process; there is nothing to sandbox.
pub struct EvaluateExpression;

impl ToolHandler for EvaluateExpression {
    fn call(&self, arguments: &Value, _ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let expression = str_arg(arguments, "expression")?;
        evaluate(expression)
            .map(format_number)
            .map_err(|err| ToolError::Failed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestWorkspace;
    use serde_json::json;

    #[test]
    fn evaluates_and_formats() {
        let ws = TestWorkspace::new();
        let out = EvaluateExpression
            .call(&json!({"expression": "2 ^ 10 + sqrt(16)"}), &ws.tool_context())
            .expect("evaluate");
        assert_eq!(out, "1028");
    }

    #[test]
    fn errors_are_reported_not_raised() {
        let ws = TestWorkspace::new();
        let err = EvaluateExpression
            .call(&json!({"expression": "__import__('os')"}), &ws.tool_context())
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
        assert!(!err.is_terminal());
    }
}
