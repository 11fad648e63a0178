//! Error types for graph construction, editing and persistence

use std::path::PathBuf;
use thiserror::Error;

use crate::nodes::NodeId;

/// Structured failures surfaced by the graph core.
///
/// Missing inputs, type mismatches and absent buffers are not errors: they are
/// the normal state of a graph that is being edited and are handled as no-ops.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("graph `{0}` is read-only")]
    ReadOnly(String),
    #[error("node `{0}` not found")]
    NodeNotFound(NodeId),
    #[error("port {index} out of range on node `{node}`")]
    PortOutOfRange { node: NodeId, index: usize },
    #[error("unknown node type `{0}`")]
    UnknownNodeType(String),
    #[error("`{parameter}` is not a promoted parameter of node `{node}`")]
    UnknownParameter { node: NodeId, parameter: String },
    #[error("not a graph file: {0}")]
    InvalidGraphFile(PathBuf),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;
