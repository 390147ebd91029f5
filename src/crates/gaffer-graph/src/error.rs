//! Error types for graph validation.

use thiserror::Error;

/// Result type alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Problems reported by graph validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An edge references a node id that is not defined in the graph
    #[error("Edge {edge_source} -> {target} references unknown node '{node}'")]
    UnknownNode {
        edge_source: String,
        target: String,
        node: String,
    },

    /// The directed edge set contains at least one cycle; the payload is
    /// a concrete path `v0 -> ... -> v0`
    #[error("Cycle detected: {0}")]
    Cycle(String),
}
