//! Error types for wfrun.
//!
//! Errors carry a machine-parseable code alongside the human-readable
//! message. Runtime error records reuse the codes as their `type` field.

use thiserror::Error;

/// Result type alias for wfrun operations.
pub type Result<T> = std::result::Result<T, Error>;

/// wfrun error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Reference error: {0}")]
    Reference(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Condition error: {0}")]
    Condition(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Router error: {0}")]
    RouterNoMatch(String),

    #[error("Output schema error: {0}")]
    OutputSchema(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Parse(_) => "PARSE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Compile(_) => "COMPILE_ERROR",
            Error::Reference(_) => "REFERENCE_ERROR",
            Error::Mapping(_) => "MAPPING_ERROR",
            Error::Condition(_) => "CONDITION_ERROR",
            Error::Executor(_) => "EXECUTOR_ERROR",
            Error::Timeout(_) => "TIMEOUT_ERROR",
            Error::RouterNoMatch(_) => "ROUTER_NO_MATCH",
            Error::OutputSchema(_) => "OUTPUT_SCHEMA_ERROR",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Convert to a structured JSON error envelope.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}
