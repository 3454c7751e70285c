//! In-memory implementation of [`TableAccessor`].
//!
//! [`InMemoryTable`] is a first-class backend for tests, ephemeral caches,
//! and anywhere persistence isn't needed. Each `call` runs against a
//! working copy of the rows and swaps it in only when the callback returns
//! `Ok`, matching the commit/rollback semantics of the SQLite backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use tablecache_core::Entity;

use crate::error::StorageError;
use crate::traits::{TableAccessor, TableSession};

type Rows<E> = IndexMap<<E as Entity>::Id, E>;

/// In-memory table keyed by record identifier.
pub struct InMemoryTable<E: Entity> {
    rows: Arc<Mutex<Rows<E>>>,
}

impl<E: Entity> InMemoryTable<E> {
    /// Creates a new empty table.
    pub fn new() -> Self {
        InMemoryTable {
            rows: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// Creates a table pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = E>) -> Self {
        let table = Self::new();
        for record in records {
            table.insert(record);
        }
        table
    }

    fn rows(&self) -> MutexGuard<'_, Rows<E>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces a record outside any cache, as another writer would.
    pub fn insert(&self, record: E) {
        self.rows().insert(record.id(), record);
    }

    /// Removes a record outside any cache.
    pub fn remove(&self, id: &E::Id) -> Option<E> {
        self.rows().shift_remove(id)
    }

    pub fn row(&self, id: &E::Id) -> Option<E> {
        self.rows().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }
}

impl<E: Entity> Default for InMemoryTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Clone for InMemoryTable<E> {
    /// Clones share the same rows.
    fn clone(&self) -> Self {
        InMemoryTable {
            rows: Arc::clone(&self.rows),
        }
    }
}

/// Working copy handed to `call` callbacks.
struct MemorySession<E: Entity> {
    rows: Rows<E>,
}

impl<E: Entity> TableSession<E> for MemorySession<E> {
    fn get_many(&mut self, ids: &[E::Id]) -> Result<Vec<E>, StorageError> {
        Ok(ids.iter().filter_map(|id| self.rows.get(id).cloned()).collect())
    }

    fn update(&mut self, records: &[E]) -> Result<(), StorageError> {
        for record in records {
            self.rows.insert(record.id(), record.clone());
        }
        Ok(())
    }

    fn all(&mut self) -> Result<Vec<E>, StorageError> {
        let mut all: Vec<(&E::Id, &E)> = self.rows.iter().collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        Ok(all.into_iter().map(|(_, record)| record.clone()).collect())
    }
}

impl<E: Entity> TableAccessor<E> for InMemoryTable<E> {
    async fn get(&self, id: &E::Id, cancel: &CancellationToken) -> Result<Option<E>, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        Ok(self.row(id))
    }

    async fn call<T, F>(&self, action: F, cancel: &CancellationToken) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TableSession<E>) -> Result<T, StorageError> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let mut rows = self.rows();
        let mut session = MemorySession { rows: rows.clone() };
        let out = action(&mut session)?;
        *rows = session.rows;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Person;

    #[tokio::test]
    async fn test_get_and_all() {
        let table = InMemoryTable::with_records([Person::new(2, "Bob", 40), Person::new(1, "Ada", 36)]);
        let cancel = CancellationToken::new();

        assert_eq!(table.get(&1, &cancel).await.unwrap().unwrap().name, "Ada");
        assert!(table.get(&9, &cancel).await.unwrap().is_none());

        let all = table.call(|s| s.all(), &cancel).await.unwrap();
        let ids: Vec<i64> = all.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_commits() {
        let table = InMemoryTable::with_records([Person::new(1, "Ada", 36)]);
        let cancel = CancellationToken::new();

        table
            .call(|s| s.update(&[Person::new(1, "Ada", 37), Person::new(3, "Cy", 20)]), &cancel)
            .await
            .unwrap();
        assert_eq!(table.row(&1).unwrap().age, 37);
        assert_eq!(table.len(), 2);

        let got = table.call(|s| s.get_many(&[3, 4]), &cancel).await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_rolls_back() {
        let table = InMemoryTable::with_records([Person::new(1, "Ada", 36)]);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = table
            .call(
                |s| {
                    s.update(&[Person::new(1, "Ada", 99)])?;
                    Err(StorageError::Decode {
                        reason: "boom".to_string(),
                    })
                },
                &cancel,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(table.row(&1).unwrap().age, 36);
    }

    #[tokio::test]
    async fn test_cancelled_call_does_not_run() {
        let table = InMemoryTable::<Person>::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = table.call(|s| s.all(), &cancel).await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
    }
}
