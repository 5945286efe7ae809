//! Error types for the table store.

use thiserror::Error;

/// Errors raised while resolving a merge strategy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("Unknown merge strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid parameters for merge strategy {strategy}: {reason}")]
    InvalidParameters { strategy: String, reason: String },

    #[error("Local merge functions cannot be sent to peers")]
    NotSerializable,
}

impl MergeError {
    pub fn invalid(strategy: &str, reason: impl Into<String>) -> Self {
        MergeError::InvalidParameters {
            strategy: strategy.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur in store operations.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
