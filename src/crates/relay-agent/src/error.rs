//! Error types for agent execution

use thiserror::Error;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur while driving the agent loop
#[derive(Error, Debug)]
pub enum AgentError {
    /// Provider call failed
    #[error("provider error: {0}")]
    Provider(String),

    /// Tool invocation failed
    #[error("tool '{name}' failed: {error}")]
    Tool { name: String, error: String },

    /// Bad configuration or schema
    #[error("validation error: {0}")]
    Validation(String),

    /// The run context was canceled
    #[error("canceled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn tool(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Tool {
            name: name.into(),
            error: error.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}
