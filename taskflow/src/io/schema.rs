//! Embedded JSON Schemas for task and persona documents.

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;

pub const TASK_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/task.schema.json"
));
pub const PERSONA_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/persona.schema.json"
));

/// Compile a schema value.
pub fn compile(schema: &Value) -> Result<Validator> {
    validator_for(schema).map_err(|err| anyhow!("invalid schema: {err}"))
}

/// All schema violations of `instance`, as stable strings.
pub fn violations(validator: &Validator, instance: &Value) -> Vec<String> {
    validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect()
}

fn check_embedded(schema: &str, instance: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(schema).context("parse embedded schema")?;
    let validator = compile(&schema)?;
    Ok(violations(&validator, instance))
}

/// Schema violations of a task document (empty when valid).
pub fn check_task(document: &Value) -> Result<Vec<String>> {
    check_embedded(TASK_SCHEMA, document)
}

/// Schema violations of a persona document (empty when valid).
pub fn check_persona(document: &Value) -> Result<Vec<String>> {
    check_embedded(PERSONA_SCHEMA, document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_schemas_compile() {
        for schema in [TASK_SCHEMA, PERSONA_SCHEMA] {
            let value: Value = serde_json::from_str(schema).expect("parse");
            compile(&value).expect("compile");
        }
    }

    #[test]
    fn serialized_task_is_schema_valid() {
        let value = serde_json::to_value(crate::test_support::task("t1")).expect("to value");
        assert_eq!(check_task(&value).expect("check"), Vec::<String>::new());
    }

    #[test]
    fn missing_fields_and_wrong_types_are_reported() {
        let errors = check_task(&json!({
            "task_id": "t1",
            "created_by": "ops",
            "timestamp": "2026-01-01T00:00:00Z",
            "persona": "writer",
            "priority": "high",
            "output_path": "out.md",
            "extra": true
        }))
        .expect("check");
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("objective")));
        assert!(errors.iter().any(|e| e.contains("\"high\"")));
    }

    #[test]
    fn persona_requires_prompt() {
        let errors = check_persona(&json!({"persona_name": "p"})).expect("check");
        assert_eq!(errors.len(), 1);
    }
}
