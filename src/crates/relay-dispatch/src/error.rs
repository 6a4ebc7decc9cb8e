//! Error types for the distributed runtime

use thiserror::Error;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur in the coordinator, queue or worker
#[derive(Error, Debug)]
pub enum DispatchError {
    /// State or attempt store failure
    #[error("store error: {0}")]
    Store(#[from] relay_store::StoreError),

    /// Queue backend failure, retryable
    #[error("queue error: {0}")]
    Queue(String),

    /// Run or resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request or configuration
    #[error("validation error: {0}")]
    Validation(String),

    /// Processor failure; treated as transient unless retries are exhausted
    #[error("processor error: {0}")]
    Processor(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run context was canceled
    #[error("canceled")]
    Cancelled,
}

impl DispatchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            DispatchError::NotFound(_) => true,
            DispatchError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Queue(err.to_string())
    }
}
