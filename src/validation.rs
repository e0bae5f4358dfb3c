//! JSON Schema enforcement for the two schema positions a workflow declares.
//!
//! A document carries schemas in two roles with different failure semantics:
//! `input.schema` gates an invocation before anything runs, while
//! `output.schema` is checked by the implicit end node and fails the run.
//! Schemas are compiled once, at workflow compile time, and checked on every
//! invocation; every violation is reported, not just the first.

use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Error, Result};

/// Which schema position of the document a compiled schema came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRole {
    /// `input.schema`: rejects an invocation before execution starts.
    Input,
    /// `output.schema`: rejects the end node's computed output.
    Output,
}

/// A workflow schema compiled for repeated checks.
pub struct CompiledSchema {
    role: SchemaRole,
    validator: Validator,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    /// Compile the workflow's input schema.
    pub fn input(schema: &Value) -> Result<Self> {
        Self::build(SchemaRole::Input, schema)
    }

    /// Compile the workflow's output schema. The output contract is always
    /// an object; anything else in `type` is rejected here as well, so a
    /// caller that skips document validation still cannot compile one.
    pub fn output(schema: &Value) -> Result<Self> {
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(Error::Schema(
                "Output schema type must be \"object\"".to_string(),
            ));
        }
        Self::build(SchemaRole::Output, schema)
    }

    fn build(role: SchemaRole, schema: &Value) -> Result<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::Schema(format!("Invalid JSON Schema: {e}")))?;
        Ok(Self { role, validator })
    }

    pub fn role(&self) -> SchemaRole {
        self.role
    }

    /// Check an instance. The error variant (and therefore the error code on
    /// runtime records) follows the schema's role, and the message lists
    /// every violation.
    pub fn check(&self, instance: &Value) -> Result<()> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() || path == "/" {
                    error.to_string()
                } else {
                    format!("{error} (at {path})")
                }
            })
            .collect();

        if violations.is_empty() {
            return Ok(());
        }

        let detail = violations.join("; ");
        match self.role {
            SchemaRole::Input => Err(Error::Schema(format!(
                "Workflow input schema validation failed: {detail}"
            ))),
            SchemaRole::Output => Err(Error::OutputSchema(format!(
                "Workflow output failed schema validation: {detail}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_schema_accepts_and_rejects() {
        let schema = json!({
            "type": "object",
            "required": ["x", "y"],
            "properties": {
                "x": { "type": "integer" },
                "y": { "type": "string" }
            }
        });

        let compiled = CompiledSchema::input(&schema).unwrap();
        assert_eq!(compiled.role(), SchemaRole::Input);
        assert!(compiled.check(&json!({"x": 1, "y": "hello"})).is_ok());

        let err = compiled.check(&json!({"y": "hello"})).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(err.to_string().contains("input schema validation failed"));
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn test_output_schema_uses_output_error() {
        let schema = json!({
            "type": "object",
            "required": ["sum"],
            "properties": { "sum": { "type": "number" } }
        });

        let compiled = CompiledSchema::output(&schema).unwrap();
        assert!(compiled.check(&json!({"sum": 3})).is_ok());

        let err = compiled.check(&json!({"sum": "three"})).unwrap_err();
        assert!(matches!(err, Error::OutputSchema(_)));
        assert_eq!(err.code(), "OUTPUT_SCHEMA_ERROR");
    }

    #[test]
    fn test_output_schema_must_be_object() {
        assert!(CompiledSchema::output(&json!({"type": "array"})).is_err());
        assert!(CompiledSchema::output(&json!({})).is_err());
        assert!(CompiledSchema::output(&json!({"type": "object"})).is_ok());
    }

    #[test]
    fn test_all_violations_reported() {
        let schema = json!({
            "type": "object",
            "required": ["a", "b"],
            "properties": {
                "a": { "type": "integer" },
                "b": { "type": "integer" },
                "c": { "type": "string" }
            }
        });

        let compiled = CompiledSchema::input(&schema).unwrap();
        let err = compiled.check(&json!({"c": 5})).unwrap_err();
        let message = err.to_string();
        // Both missing fields and the type mismatch show up together.
        assert!(message.contains("a"), "{message}");
        assert!(message.contains("b"), "{message}");
        assert!(message.contains("c"), "{message}");
    }

    #[test]
    fn test_violation_paths_are_reported() {
        let schema = json!({
            "type": "object",
            "properties": {
                "user": {
                    "type": "object",
                    "properties": { "id": { "type": "integer" } }
                }
            }
        });

        let compiled = CompiledSchema::input(&schema).unwrap();
        let err = compiled.check(&json!({"user": {"id": "nope"}})).unwrap_err();
        assert!(err.to_string().contains("/user/id"), "{err}");
    }

    #[test]
    fn test_invalid_schema_rejected_at_compile() {
        let bad = json!({"type": "object", "required": 42});
        assert!(CompiledSchema::input(&bad).is_err());
    }
}
