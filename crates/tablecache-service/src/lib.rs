//! Table-level record caching for tablecache.
//!
//! A [`RecordCache`] holds the working set of one entity table in memory,
//! tracks which records diverged from storage, and keeps itself in sync on
//! a schedule. [`CacheService`] hosts that schedule as a background task.
//!
//! # Modules
//!
//! - [`config`]: CacheConfig with defaults and environment overrides
//! - [`error`]: ServiceError enum
//! - [`record_cache`]: RecordCache and the refresh cycle
//! - [`cursor`]: RecordCursor, iteration that refreshes per step
//! - [`hosted`]: CacheService start/stop lifecycle

pub mod config;
pub mod cursor;
pub mod error;
pub mod hosted;
pub mod record_cache;

pub use config::CacheConfig;
pub use cursor::RecordCursor;
pub use error::ServiceError;
pub use hosted::CacheService;
pub use record_cache::{RecordCache, RefreshReport};

#[cfg(test)]
mod fixtures;
