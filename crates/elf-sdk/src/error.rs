//! Error types for the Elves SDK.

use crate::channel::ChannelError;
use elf_core::{CoreError, MergeError};
use thiserror::Error;

/// Error type for SDK operations.
#[derive(Error, Debug)]
pub enum SdkError {
    /// Store or merge failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The realtime channel refused a message.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A selector could not be parsed.
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<MergeError> for SdkError {
    fn from(err: MergeError) -> Self {
        SdkError::Core(CoreError::Merge(err))
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::SerializationError(err.to_string())
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
