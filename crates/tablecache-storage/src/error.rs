//! Storage error types for tablecache-storage.
//!
//! [`StorageError`] covers serialization, backend failures, the entry
//! identifier guard, and cancellation of in-flight storage calls.

use thiserror::Error;

use tablecache_core::CoreError;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Descriptor or statement construction failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A row could not be mapped back to an entity.
    #[error("row decode error: {reason}")]
    Decode { reason: String },

    /// A record was offered to an entry holding a different identifier.
    #[error("identifier mismatch: entry holds {expected}, record has {actual}")]
    IdMismatch { expected: String, actual: String },

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// A blocking storage task panicked or was aborted.
    #[error("storage task failed: {0}")]
    Task(String),
}
