//! Store error types.

use thiserror::Error;

/// Errors raised by a key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store failed the operation.
    #[error("store operation failed: {0}")]
    Backend(String),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a backend error from any displayable cause.
    pub fn backend(cause: impl std::fmt::Display) -> Self {
        Self::Backend(cause.to_string())
    }
}
