//! Workflow documents: model, parsing, references, mappings, conditions,
//! and validation.

pub mod condition;
pub mod mapping;
mod parser;
pub mod reference;
pub mod types;
mod validator;

pub use parser::{parse_document, parse_document_file, parse_document_value};
pub use types::{
    BranchEdge, Edge, EdgeRoute, InputSpec, Mapping, Node, NodeKind, OutputSpec, SimpleEdge,
    Workflow, END_NODE_ID, START_NODE_ID,
};
pub use validator::{validate_workflow, ValidationIssue, ValidationReport};
