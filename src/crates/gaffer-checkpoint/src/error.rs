//! Error types for checkpoint persistence.

use thiserror::Error;

/// Result type alias for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors produced by the checkpoint layer
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem failure while reading or writing checkpoint state
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint file could not be serialized or deserialized
    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An operation referenced a node id the checkpoint does not track
    #[error("checkpoint has no entry for node '{0}'")]
    UnknownNode(String),
}
