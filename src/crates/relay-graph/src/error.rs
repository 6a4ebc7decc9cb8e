//! Error types for graph construction and execution

use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while compiling or executing a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure validation failed; the message names the offending
    /// identifier
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// A node's execution returned an error
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// Run not found for resume
    #[error("not found: {0}")]
    NotFound(String),

    /// Checkpoint or run persistence error
    #[error("store error: {0}")]
    Store(#[from] relay_store::StoreError),

    /// Agent node failure
    #[error("agent error: {0}")]
    Agent(#[from] relay_agent::AgentError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run context was canceled
    #[error("canceled")]
    Cancelled,
}

impl GraphError {
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Whether this error is a cancellation, possibly wrapped by an agent
    pub fn is_cancelled(&self) -> bool {
        match self {
            GraphError::Cancelled => true,
            GraphError::Agent(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
