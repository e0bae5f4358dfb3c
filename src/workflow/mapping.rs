//! Input and output mapping engine.
//!
//! Input mappings resolve `$...` references against the workflow state to
//! build the object handed to an executor. Output mappings shape the raw
//! executor result before publication using a JSONPath-lite dialect.

use serde_json::Value;

use super::reference::{resolve_value, ResolveOptions};
use super::types::Mapping;
use crate::engine::WorkflowState;
use crate::error::Result;

/// Sentinels that denote "the raw executor result" in an output mapping.
const RESULT_SENTINELS: [&str; 4] = ["$result", "$tool_result", "$jq_result", "$code_result"];

/// Resolve a node's input mapping into the concrete object passed to its
/// executor. Keys keep their declared names; values are resolved constants
/// or references.
pub fn resolve_input_mapping(
    mapping: &Mapping,
    state: &WorkflowState,
    options: ResolveOptions,
) -> Result<Value> {
    let mut resolved = serde_json::Map::with_capacity(mapping.len());
    for (key, value) in mapping {
        resolved.insert(key.clone(), resolve_value(state, value, options)?);
    }
    Ok(Value::Object(resolved))
}

/// Shape a raw executor result into what the node publishes.
///
/// - empty mapping: the raw result, unchanged;
/// - `$result` (or a kind-specific alias): the raw result;
/// - `$.a.b`: dict-only traversal of the raw result, missing keys yield null;
/// - anything else: stored literally.
pub fn apply_output_mapping(mapping: &Mapping, raw_result: &Value) -> Value {
    if mapping.is_empty() {
        return raw_result.clone();
    }

    let mut out = serde_json::Map::with_capacity(mapping.len());
    for (key, spec) in mapping {
        let value = match spec {
            Value::String(s) if RESULT_SENTINELS.contains(&s.as_str()) => raw_result.clone(),
            Value::String(s) if s.starts_with("$.") => select_field(raw_result, &s[2..]),
            other => other.clone(),
        };
        out.insert(key.clone(), value);
    }
    Value::Object(out)
}

/// Follow a dotted selector through the raw result. Non-object intermediate
/// values and missing keys resolve to null.
fn select_field(result: &Value, path: &str) -> Value {
    let mut current = result;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => current = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

/// Whether an output-mapping value is a well-formed selector or sentinel.
/// Used by the validator: a `$`-string that is neither is almost always an
/// authoring mistake, so it is rejected instead of stored as a constant.
pub fn is_valid_output_spec(spec: &Value) -> bool {
    match spec {
        Value::String(s) if s.starts_with('$') => {
            RESULT_SENTINELS.contains(&s.as_str())
                || (s.starts_with("$.")
                    && s.len() > 2
                    && s[2..].split('.').all(|seg| !seg.is_empty()))
        }
        _ => true,
    }
}
