use crate::id::{EdgeId, NodeId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CanvasError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CanvasError {
    /// Initial fetch failed; the store was left empty.
    #[error("Load failed: {0}")]
    Load(String),

    /// A single create/update/delete was rejected by the backend.
    #[error("{op} failed: {reason} (reloaded: {reloaded})")]
    Mutation {
        op: &'static str,
        reason: String,
        reloaded: bool,
    },

    /// Cyclic or orphaned parent chain found in stored data.
    #[error("Structural anomaly at {node}: {detail}")]
    Anomaly { node: NodeId, detail: String },

    #[error("Node {0} cannot contain itself")]
    SelfReference(NodeId),

    #[error("Moving {node} into {target} would create a containment cycle")]
    Cycle { node: NodeId, target: NodeId },

    #[error("Node {0} is a leaf and cannot hold children")]
    NotAContainer(NodeId),

    #[error("Edge cannot connect {0} to itself")]
    SelfLoop(NodeId),

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    #[error("Edge not found: {0}")]
    UnknownEdge(EdgeId),

    #[error("Invalid config: {0}")]
    Config(String),
}
