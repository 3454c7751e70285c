//! Service error types for tablecache-service.

use thiserror::Error;

use tablecache_core::CoreError;
use tablecache_storage::StorageError;

/// Errors produced by the record cache and its hosted lifecycle.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// An environment setting could not be parsed.
    #[error("invalid configuration: {key}={value}")]
    InvalidConfig { key: &'static str, value: String },

    /// `start` was called on a service whose loop is already running.
    #[error("cache service is already running")]
    AlreadyRunning,

    /// The background refresh task panicked.
    #[error("refresh task failed: {0}")]
    Task(String),
}

impl ServiceError {
    /// True when the error only reports that the caller cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Storage(StorageError::Cancelled))
    }
}
