//! Workflow document parsing.
//!
//! Documents are YAML or JSON; YAML is a superset of JSON so a single parser
//! covers both. Unknown top-level keys are rejected by the model.

use std::path::Path;

use serde_json::Value;

use super::types::Workflow;
use crate::error::{Error, Result};

/// Parse a workflow document from a YAML or JSON string.
pub fn parse_document(text: &str) -> Result<Workflow> {
    if text.trim().is_empty() {
        return Err(Error::Parse("Empty workflow document".to_string()));
    }

    serde_yaml::from_str(text).map_err(|e| parse_error(&e.to_string()))
}

/// Parse a workflow document from an in-memory JSON value.
pub fn parse_document_value(value: Value) -> Result<Workflow> {
    serde_json::from_value(value).map_err(|e| parse_error(&e.to_string()))
}

/// Parse a workflow document from a file path.
pub fn parse_document_file(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)?;
    parse_document(&content)
}

/// Turn a deserializer message into our parse error, surfacing the field
/// name when the document is merely incomplete.
fn parse_error(message: &str) -> Error {
    match missing_field_name(message) {
        Some(field) => Error::Parse(format!("Missing required field: {field}")),
        None => Error::Parse(format!("Invalid workflow document: {message}")),
    }
}

/// Serde phrases absent required fields as `missing field <quoted name>`;
/// the quote style varies by deserializer, so accept any of them.
fn missing_field_name(message: &str) -> Option<&str> {
    let (_, tail) = message.split_once("missing field")?;
    let tail = tail.trim_start();
    let open = tail
        .chars()
        .next()
        .filter(|&c| matches!(c, '`' | '\'' | '"'))?;
    let quoted = &tail[open.len_utf8()..];
    let name = quoted.split(open).next()?;
    if name.is_empty() || name.len() == quoted.len() {
        return None;
    }
    Some(name)
}
