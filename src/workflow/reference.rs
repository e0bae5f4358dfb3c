//! The `$...` reference language.
//!
//! References are a small parsed language over JSON values, never host
//! attribute access:
//!
//! ```text
//! Ref     := "$input" ("." Path)?
//!          | "$nodes." Ident ("." Path)?
//!          | "$state." Ident ("." Path)?
//! Path    := Segment ("." Segment)*
//! Segment := Ident
//! Ident   := [A-Za-z_][A-Za-z0-9_]*
//! ```
//!
//! Numeric array indexing is deliberately unsupported; workflows that need it
//! route through a `jq_transform` node.

use serde_json::Value;

use crate::engine::WorkflowState;
use crate::error::{Error, Result};

/// Controls how strict resolution is: strict lookups fail on missing data,
/// non-strict lookups yield null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub strict: bool,
}

impl ResolveOptions {
    pub const STRICT: ResolveOptions = ResolveOptions { strict: true };
    pub const LENIENT: ResolveOptions = ResolveOptions { strict: false };
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::STRICT
    }
}

/// Root of a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefRoot {
    /// `$input` — the invocation input.
    Input,
    /// `$nodes.<id>` — a published node output.
    Node(String),
    /// `$state.<k>` — a raw state key. Internal; discouraged for authors.
    State(String),
}

/// A parsed reference: root plus an object-key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: RefRoot,
    pub path: Vec<String>,
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Reference {
    /// Parse a reference string. The input must start with `$`; anything that
    /// does not match the grammar is a syntax error.
    pub fn parse(expr: &str) -> Result<Reference> {
        let body = expr
            .strip_prefix('$')
            .ok_or_else(|| Error::Mapping(format!("Not a reference: {expr}")))?;

        let mut parts = body.split('.');
        let root = parts.next().unwrap_or_default();
        let segments: Vec<&str> = parts.collect();

        for seg in &segments {
            if !is_ident(seg) {
                return Err(Error::Mapping(format!(
                    "Invalid path segment '{seg}' in reference: {expr}"
                )));
            }
        }

        match root {
            "input" => Ok(Reference {
                root: RefRoot::Input,
                path: segments.iter().map(|s| s.to_string()).collect(),
            }),
            "nodes" => {
                let (node_id, path) = segments
                    .split_first()
                    .ok_or_else(|| Error::Mapping(format!("Missing node id in reference: {expr}")))?;
                Ok(Reference {
                    root: RefRoot::Node(node_id.to_string()),
                    path: path.iter().map(|s| s.to_string()).collect(),
                })
            }
            "state" => {
                let (key, path) = segments
                    .split_first()
                    .ok_or_else(|| Error::Mapping(format!("Missing state key in reference: {expr}")))?;
                Ok(Reference {
                    root: RefRoot::State(key.to_string()),
                    path: path.iter().map(|s| s.to_string()).collect(),
                })
            }
            _ => Err(Error::Mapping(format!("Unsupported reference: {expr}"))),
        }
    }

    /// Evaluate against the workflow state.
    pub fn resolve(&self, state: &WorkflowState, options: ResolveOptions) -> Result<Value> {
        let base = match &self.root {
            RefRoot::Input => state.input.clone(),
            RefRoot::Node(id) => match state.data.get(id) {
                Some(v) => v.clone(),
                None if options.strict => {
                    return Err(Error::Reference(format!(
                        "No output published for node '{id}'"
                    )))
                }
                None => return Ok(Value::Null),
            },
            RefRoot::State(key) => match state.state_key(key) {
                Some(v) => v,
                None if options.strict => {
                    return Err(Error::Reference(format!("Missing state key: {key}")))
                }
                None => return Ok(Value::Null),
            },
        };

        walk_path(&base, &self.path, options)
    }
}

/// Object-only path traversal. Arrays and scalars terminate the walk.
fn walk_path(base: &Value, path: &[String], options: ResolveOptions) -> Result<Value> {
    let mut current = base;
    for segment in path {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => current = v,
                None if options.strict => {
                    return Err(Error::Reference(format!(
                        "Missing key '{}' while resolving path {}",
                        segment,
                        path.join(".")
                    )))
                }
                None => return Ok(Value::Null),
            },
            _ if options.strict => {
                return Err(Error::Reference(format!(
                    "Cannot traverse '{}' through a non-object value",
                    segment
                )))
            }
            _ => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}

/// Whether a mapping value is a reference string (starts with `$`).
pub fn is_reference(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.starts_with('$'))
}

/// Resolve a mapping value: constants pass through unchanged, reference
/// strings are parsed and evaluated.
pub fn resolve_value(state: &WorkflowState, value: &Value, options: ResolveOptions) -> Result<Value> {
    match value {
        Value::String(s) if s.starts_with('$') => Reference::parse(s)?.resolve(state, options),
        other => Ok(other.clone()),
    }
}
