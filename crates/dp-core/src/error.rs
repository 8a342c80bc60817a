//! Error types for dp-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an external tool capability.
///
/// `kind` is whatever the external collaborator called the failure
/// (`not_found`, `timeout`, ...) and is carried through unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("tool error ({kind}): {message}")]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Tool call abandoned because the run was cancelled
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new("cancelled", message)
    }
}

/// Main error type for dp-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Policy violation: {from} may not message {to}")]
    PolicyViolation { from: String, to: String },

    #[error("Agent {agent} requires capability '{capability}' which is not bound")]
    UnboundCapability { agent: String, capability: String },

    #[error("Invalid task for agent {agent}: {reason}")]
    InvalidTask { agent: String, reason: String },

    #[error("Unsatisfiable task: capability '{capability}' {reason}")]
    UnsatisfiableTask { capability: String, reason: String },

    #[error("Task matches no known capability: {0}")]
    UnclassifiedTask(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wire tag used when this error travels inside an `error` message
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            Self::UnboundCapability { .. } => ErrorKind::UnboundCapability,
            Self::InvalidTask { .. } => ErrorKind::InvalidTask,
            Self::UnsatisfiableTask { .. } => ErrorKind::UnsatisfiableTask,
            Self::UnclassifiedTask(_) => ErrorKind::UnclassifiedTask,
            Self::Tool(e) if e.kind == "cancelled" => ErrorKind::Cancelled,
            Self::Tool(_) => ErrorKind::Tool,
            Self::UnknownAgent(_) => ErrorKind::UnknownAgent,
            Self::Config(_) => ErrorKind::Config,
            Self::Json(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PolicyViolation,
    UnboundCapability,
    InvalidTask,
    UnsatisfiableTask,
    UnclassifiedTask,
    Tool,
    UnknownAgent,
    Config,
    Cancelled,
    Internal,
}

/// Result type alias for dp-core
pub type Result<T> = std::result::Result<T, Error>;
