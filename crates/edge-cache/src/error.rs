//! Cache error types.

use edge_kv::StoreError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A metadata lock could not be acquired within the retry budget.
    #[error("failed to acquire lock `{lock}` after {attempts} attempts")]
    LockContention { lock: String, attempts: u32 },

    /// The response declared tags that cannot be indexed.
    #[error("invalid cache tags: {0}")]
    InvalidTag(#[from] TagError),

    /// The origin handler failed.
    #[error("origin handler failed: {0}")]
    Origin(#[source] anyhow::Error),

    /// A record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a response's tag list is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("{count} tags declared, at most {max} allowed")]
    TooMany { count: usize, max: usize },

    #[error("tag `{tag}` is {len} characters long, at most {max} allowed")]
    TooLong { tag: String, len: usize, max: usize },

    #[error("tag `{tag}` contains forbidden character `{character}`")]
    InvalidCharacter { tag: String, character: char },
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}
