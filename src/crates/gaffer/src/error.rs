//! Error types for the orchestrator.
//!
//! Provides a unified error type for orchestrator operations. Handler
//! failures never surface through this type during traversal; they are
//! folded into failed node outcomes so the planner can react on the next
//! cycle.

use std::fmt;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, GafferError>;

/// Main error type for orchestrator operations
#[derive(Debug)]
pub enum GafferError {
    /// Configuration or pre-flight error
    Config(String),

    /// Agent CLI exceeded its timeout
    Timeout { agent: String, seconds: u64 },

    /// Agent CLI could not be spawned or exited non-zero with no stdout
    Invocation { agent: String, details: String },

    /// Git command failure
    Git(String),

    /// Graph error from the engine
    Graph(gaffer_graph::GraphError),

    /// Checkpoint persistence error
    Checkpoint(gaffer_checkpoint::CheckpointError),

    /// IO error
    Io(std::io::Error),

    /// JSON serialization error
    Json(serde_json::Error),

    /// YAML parse error
    Yaml(serde_yaml::Error),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for GafferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Timeout { agent, seconds } => {
                write!(f, "Agent '{}' timed out after {} seconds", agent, seconds)
            }
            Self::Invocation { agent, details } => {
                write!(f, "Agent '{}' invocation failed: {}", agent, details)
            }
            Self::Git(msg) => write!(f, "Git error: {}", msg),
            Self::Graph(err) => write!(f, "Graph error: {}", err),
            Self::Checkpoint(err) => write!(f, "Checkpoint error: {}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Json(err) => write!(f, "Serialization error: {}", err),
            Self::Yaml(err) => write!(f, "YAML error: {}", err),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for GafferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(err) => Some(err),
            Self::Checkpoint(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Yaml(err) => Some(err),
            _ => None,
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for GafferError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for GafferError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<serde_yaml::Error> for GafferError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err)
    }
}

impl From<gaffer_graph::GraphError> for GafferError {
    fn from(err: gaffer_graph::GraphError) -> Self {
        Self::Graph(err)
    }
}

impl From<gaffer_checkpoint::CheckpointError> for GafferError {
    fn from(err: gaffer_checkpoint::CheckpointError) -> Self {
        Self::Checkpoint(err)
    }
}

impl From<String> for GafferError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for GafferError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_string())
    }
}
