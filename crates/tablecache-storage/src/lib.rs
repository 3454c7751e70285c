//! Record snapshots and table access for tablecache.
//!
//! Provides the [`CacheEntry`] unit (serialized snapshot + content hash),
//! the [`TableAccessor`] boundary the record cache talks to, and the
//! [`InMemoryTable`] and [`SqliteTable`] backends.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`hash`]: 128-bit blake3 content hashes over snapshot text
//! - [`entry`]: CacheEntry and its Empty/Fresh/Expired/Dirty states
//! - [`dirty`]: DirtySet computation over a collection of entries
//! - [`traits`]: TableSession and TableAccessor trait definitions
//! - [`convert`]: SqlValue and row conversions for the SQLite backend
//! - [`memory`]: InMemoryTable implementation
//! - [`schema`]: connection setup and migrations for the SQLite backend
//! - [`sqlite`]: SqliteTable implementation

pub mod convert;
pub mod dirty;
pub mod entry;
pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

// Re-export key types for ergonomic use.
pub use dirty::{compute_dirty_set, DirtySet};
pub use entry::{CacheEntry, EntryStatus};
pub use error::StorageError;
pub use hash::{hash_snapshot, ContentHash};
pub use memory::InMemoryTable;
pub use sqlite::SqliteTable;
pub use traits::{TableAccessor, TableSession};

pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod fixtures;
