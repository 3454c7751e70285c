//! The storage boundary the record cache talks to.
//!
//! Two-layer API design:
//! - [`TableSession`] is a live connection + transaction handed to a
//!   callback. Its methods are synchronous and run inside the transaction.
//! - [`TableAccessor`] owns connections. `get` is the single-record miss
//!   path; `call` opens a transaction, runs the callback, and commits on
//!   `Ok` (rolling back on `Err`).
//!
//! The record cache never opens connections itself. All backends
//! (InMemoryTable, SqliteTable, etc.) implement both traits.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use tablecache_core::Entity;

use crate::error::StorageError;

/// Operations available inside one storage transaction.
pub trait TableSession<E: Entity> {
    /// Loads the records whose identifiers are in `ids`. Missing ids are
    /// skipped.
    fn get_many(&mut self, ids: &[E::Id]) -> Result<Vec<E>, StorageError>;

    /// Persists `records`, inserting those that do not exist yet.
    fn update(&mut self, records: &[E]) -> Result<(), StorageError>;

    /// Loads every record of the table, ordered by identifier.
    fn all(&mut self) -> Result<Vec<E>, StorageError>;
}

/// Connection-owning access to one entity table.
pub trait TableAccessor<E: Entity>: Send + Sync + 'static {
    /// Loads one record, `None` when it does not exist.
    fn get(
        &self,
        id: &E::Id,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<E>, StorageError>> + Send;

    /// Runs `action` against a live session inside a transaction.
    ///
    /// Resolves to [`StorageError::Cancelled`] when `cancel` fires first.
    fn call<T, F>(
        &self,
        action: F,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<T, StorageError>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TableSession<E>) -> Result<T, StorageError> + Send + 'static;
}
