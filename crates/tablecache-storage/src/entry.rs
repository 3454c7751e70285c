//! Cache Entry: one record's serialized snapshot plus its content hash.
//!
//! An entry moves through four states:
//! - **Empty**: no snapshot loaded yet
//! - **Fresh**: snapshot loaded, hash matches, accessed within the expiry
//! - **Expired**: snapshot present but not accessed within the expiry
//! - **Dirty**: the snapshot no longer hashes to the hash recorded at the
//!   last confirmed sync with storage
//!
//! Dirtiness is never stored as a flag. [`CacheEntry::has_changed`]
//! recomputes the hash of the current snapshot, so the only way out of
//! Dirty is [`CacheEntry::set_value`], which records a new confirmed hash.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use tablecache_core::Entity;

use crate::error::StorageError;
use crate::hash::{hash_snapshot, ContentHash};
use crate::traits::TableAccessor;

/// Observable entry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Empty,
    Fresh,
    Expired,
    Dirty,
}

#[derive(Debug)]
struct EntryState {
    snapshot: Option<Arc<str>>,
    /// Hash at the last confirmed sync; `None` until first confirmed.
    confirmed: Option<ContentHash>,
    created: Instant,
    modified: Instant,
    accessed: Instant,
}

/// A single cached record.
pub struct CacheEntry<E: Entity> {
    id: E::Id,
    state: Mutex<EntryState>,
    _record: PhantomData<fn() -> E>,
}

impl<E: Entity> CacheEntry<E> {
    /// Creates an Empty entry for `id`.
    pub fn new(id: E::Id) -> Self {
        let now = Instant::now();
        CacheEntry {
            id,
            state: Mutex::new(EntryState {
                snapshot: None,
                confirmed: None,
                created: now,
                modified: now,
                accessed: now,
            }),
            _record: PhantomData,
        }
    }

    /// Creates a Fresh entry from a record confirmed against storage.
    pub fn from_record(record: &E) -> Result<Self, StorageError> {
        let entry = Self::new(record.id());
        entry.set_value(record)?;
        Ok(entry)
    }

    /// Creates a Dirty entry for a record storage has never confirmed.
    pub fn staged(record: &E) -> Result<Self, StorageError> {
        let entry = Self::new(record.id());
        entry.stage(record)?;
        Ok(entry)
    }

    pub fn id(&self) -> &E::Id {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        // Every mutation assigns whole fields, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_id(&self, record: &E) -> Result<(), StorageError> {
        let actual = record.id();
        if actual != self.id {
            return Err(StorageError::IdMismatch {
                expected: self.id.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Returns the record if a snapshot exists and was accessed within
    /// `expiry`. A hit refreshes the last-access time.
    pub fn try_get(&self, expiry: Duration) -> Result<Option<E>, StorageError> {
        let snapshot = {
            let mut state = self.lock();
            let Some(snapshot) = state.snapshot.clone() else {
                return Ok(None);
            };
            if state.accessed.elapsed() > expiry {
                return Ok(None);
            }
            state.accessed = Instant::now();
            snapshot
        };
        Ok(Some(serde_json::from_str(&snapshot)?))
    }

    /// Returns the cached record, or loads it from `table` on a miss.
    ///
    /// A dirty snapshot is served even once expired. A storage miss returns
    /// `None` and leaves the entry untouched, as does cancellation. If the
    /// record is staged while the load is in flight, the staged snapshot
    /// wins and is returned.
    pub async fn fetch<A>(
        &self,
        table: &A,
        expiry: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<E>, StorageError>
    where
        A: TableAccessor<E>,
    {
        let seen = {
            let mut state = self.lock();
            let current = state.snapshot.clone();
            match current {
                Some(snapshot) if is_dirty(&state) || state.accessed.elapsed() <= expiry => {
                    state.accessed = Instant::now();
                    drop(state);
                    return Ok(Some(serde_json::from_str(&snapshot)?));
                }
                other => other,
            }
        };

        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            loaded = table.get(&self.id, cancel) => loaded?,
        };

        match loaded {
            Some(record) => self.adopt_loaded(seen.as_ref(), &record).map(Some),
            None => Ok(None),
        }
    }

    /// Records `record` as loaded from storage while the snapshot was `seen`.
    ///
    /// Like [`confirm_flush`](Self::confirm_flush): the loaded copy replaces
    /// the snapshot only if it is still `seen`. Otherwise the newer snapshot
    /// is kept and returned, and only the confirmed hash moves.
    fn adopt_loaded(&self, seen: Option<&Arc<str>>, record: &E) -> Result<E, StorageError> {
        self.check_id(record)?;
        let text: Arc<str> = Arc::from(serde_json::to_string(record)?);

        let mut state = self.lock();
        state.confirmed = Some(hash_snapshot(&text));
        let newer = match (&state.snapshot, seen) {
            (None, None) => None,
            (Some(current), Some(seen)) if Arc::ptr_eq(current, seen) => None,
            (current, _) => current.clone(),
        };
        match newer {
            Some(current) => {
                drop(state);
                Ok(serde_json::from_str(&current)?)
            }
            None => {
                let now = Instant::now();
                state.snapshot = Some(text);
                state.modified = now;
                state.accessed = now;
                Ok(record.clone())
            }
        }
    }

    /// Replaces the snapshot with `record` as confirmed by storage.
    ///
    /// Fails with [`StorageError::IdMismatch`] without touching the entry if
    /// `record` carries a different identifier.
    pub fn set_value(&self, record: &E) -> Result<(), StorageError> {
        self.check_id(record)?;
        let text: Arc<str> = Arc::from(serde_json::to_string(record)?);
        let now = Instant::now();

        let mut state = self.lock();
        state.confirmed = Some(hash_snapshot(&text));
        state.snapshot = Some(text);
        state.modified = now;
        state.accessed = now;
        Ok(())
    }

    /// Records `record` as what storage now holds after flushing `flushed`.
    ///
    /// If the snapshot is still `flushed`, this behaves like
    /// [`set_value`](Self::set_value). If it was staged again while the flush
    /// was in flight, the newer snapshot is kept and only the confirmed hash
    /// moves, so the entry stays dirty. Returns whether the snapshot was
    /// replaced.
    pub fn confirm_flush(&self, flushed: &Arc<str>, record: &E) -> Result<bool, StorageError> {
        self.check_id(record)?;
        let text: Arc<str> = Arc::from(serde_json::to_string(record)?);
        let hash = hash_snapshot(&text);

        let mut state = self.lock();
        state.confirmed = Some(hash);
        let unchanged = state
            .snapshot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, flushed));
        if unchanged {
            let now = Instant::now();
            state.snapshot = Some(text);
            state.modified = now;
            state.accessed = now;
        }
        Ok(unchanged)
    }

    /// Replaces the snapshot with a locally modified `record`, keeping the
    /// confirmed hash. The entry reports [`has_changed`](Self::has_changed)
    /// until storage confirms it through [`set_value`](Self::set_value).
    pub fn stage(&self, record: &E) -> Result<(), StorageError> {
        self.check_id(record)?;
        let text: Arc<str> = Arc::from(serde_json::to_string(record)?);
        let now = Instant::now();

        let mut state = self.lock();
        state.snapshot = Some(text);
        state.modified = now;
        state.accessed = now;
        Ok(())
    }

    /// True when the current snapshot differs from the last confirmed one.
    pub fn has_changed(&self) -> bool {
        is_dirty(&self.lock())
    }

    /// True once storage has confirmed some snapshot of this record.
    pub fn is_persisted(&self) -> bool {
        self.lock().confirmed.is_some()
    }

    pub fn status(&self, expiry: Duration) -> EntryStatus {
        let state = self.lock();
        if state.snapshot.is_none() {
            EntryStatus::Empty
        } else if is_dirty(&state) {
            EntryStatus::Dirty
        } else if state.accessed.elapsed() > expiry {
            EntryStatus::Expired
        } else {
            EntryStatus::Fresh
        }
    }

    /// Deserializes the current snapshot regardless of expiry. Does not
    /// touch the access time.
    pub fn value(&self) -> Result<Option<E>, StorageError> {
        match self.snapshot() {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<str>> {
        self.lock().snapshot.clone()
    }

    pub fn created(&self) -> Instant {
        self.lock().created
    }

    pub fn modified(&self) -> Instant {
        self.lock().modified
    }

    pub fn accessed(&self) -> Instant {
        self.lock().accessed
    }
}

fn is_dirty(state: &EntryState) -> bool {
    match (&state.snapshot, &state.confirmed) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(text), Some(confirmed)) => hash_snapshot(text) != *confirmed,
    }
}

impl<E: Entity> fmt::Debug for CacheEntry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("snapshot", &state.snapshot)
            .field("confirmed", &state.confirmed.map(|h| h.to_string()))
            .finish()
    }
}

// Entries order by snapshot text only.

impl<E: Entity> PartialEq for CacheEntry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E: Entity> Eq for CacheEntry<E> {}

impl<E: Entity> PartialOrd for CacheEntry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E: Entity> Ord for CacheEntry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.snapshot().cmp(&other.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Person;
    use crate::memory::InMemoryTable;
    use crate::traits::TableSession;
    use tokio::sync::Notify;

    /// Serves `get` from `rows` only after `release` is notified.
    #[derive(Default)]
    struct HeldGet {
        rows: InMemoryTable<Person>,
        entered: Notify,
        release: Notify,
    }

    impl TableAccessor<Person> for HeldGet {
        async fn get(&self, id: &i64, cancel: &CancellationToken) -> Result<Option<Person>, StorageError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.rows.get(id, cancel).await
        }

        async fn call<T, F>(&self, action: F, cancel: &CancellationToken) -> Result<T, StorageError>
        where
            T: Send + 'static,
            F: FnOnce(&mut dyn TableSession<Person>) -> Result<T, StorageError> + Send + 'static,
        {
            self.rows.call(action, cancel).await
        }
    }

    #[test]
    fn test_new_entry_is_empty() {
        let entry = CacheEntry::<Person>::new(42);
        assert_eq!(entry.status(Duration::from_secs(60)), EntryStatus::Empty);
        assert!(!entry.has_changed());
        assert!(entry.try_get(Duration::from_secs(60)).unwrap().is_none());
    }

    #[test]
    fn test_set_value_is_clean() {
        let entry = CacheEntry::<Person>::new(42);
        entry.set_value(&Person::new(42, "Ada", 36)).unwrap();
        assert!(!entry.has_changed());
        assert!(entry.is_persisted());
        assert_eq!(entry.status(Duration::from_secs(60)), EntryStatus::Fresh);
        let got = entry.try_get(Duration::from_secs(60)).unwrap().unwrap();
        assert_eq!(got.name, "Ada");
    }

    #[test]
    fn test_id_mismatch_leaves_snapshot_untouched() {
        let entry = CacheEntry::<Person>::new(42);
        entry.set_value(&Person::new(42, "Ada", 36)).unwrap();
        let before = entry.snapshot();

        match entry.set_value(&Person::new(43, "Bob", 40)) {
            Err(StorageError::IdMismatch { expected, actual }) => {
                assert_eq!(expected, "42");
                assert_eq!(actual, "43");
            }
            other => panic!("expected IdMismatch, got: {:?}", other),
        }
        assert!(entry.stage(&Person::new(43, "Bob", 40)).is_err());
        assert_eq!(entry.snapshot(), before);
        assert!(!entry.has_changed());
    }

    #[test]
    fn test_stage_makes_entry_dirty_until_confirmed() {
        let entry = CacheEntry::from_record(&Person::new(1, "Ada", 36)).unwrap();
        entry.stage(&Person::new(1, "Ada", 37)).unwrap();
        assert!(entry.has_changed());
        assert_eq!(entry.status(Duration::from_secs(60)), EntryStatus::Dirty);

        entry.set_value(&Person::new(1, "Ada", 37)).unwrap();
        assert!(!entry.has_changed());
    }

    #[test]
    fn test_staging_identical_content_is_not_a_change() {
        let entry = CacheEntry::from_record(&Person::new(1, "Ada", 36)).unwrap();
        entry.stage(&Person::new(1, "Ada", 36)).unwrap();
        assert!(!entry.has_changed());
    }

    #[test]
    fn test_staged_entry_is_unpersisted() {
        let entry = CacheEntry::staged(&Person::new(5, "Eve", 29)).unwrap();
        assert!(entry.has_changed());
        assert!(!entry.is_persisted());
    }

    #[test]
    fn test_expired_snapshot_is_a_miss() {
        let entry = CacheEntry::from_record(&Person::new(1, "Ada", 36)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(entry.try_get(Duration::from_millis(5)).unwrap().is_none());
        assert!(entry.snapshot().is_some(), "snapshot stays present");
        assert_eq!(entry.status(Duration::from_millis(5)), EntryStatus::Expired);
        assert!(entry.try_get(Duration::from_secs(60)).unwrap().is_some());
    }

    #[test]
    fn test_entries_order_by_snapshot() {
        let a = CacheEntry::from_record(&Person::new(2, "Ada", 36)).unwrap();
        let b = CacheEntry::from_record(&Person::new(1, "Bob", 36)).unwrap();
        // {"id":1,...} sorts before {"id":2,...}
        assert!(b < a);
        assert_eq!(a, a);
    }

    #[tokio::test]
    async fn test_fetch_loads_on_miss() {
        let table = InMemoryTable::with_records([Person::new(7, "Grace", 45)]);
        let entry = CacheEntry::<Person>::new(7);
        let cancel = CancellationToken::new();

        let got = entry.fetch(&table, Duration::from_secs(60), &cancel).await.unwrap();
        assert_eq!(got.unwrap().name, "Grace");
        assert_eq!(entry.status(Duration::from_secs(60)), EntryStatus::Fresh);
    }

    #[tokio::test]
    async fn test_fetch_storage_miss_leaves_entry_empty() {
        let table = InMemoryTable::<Person>::new();
        let entry = CacheEntry::<Person>::new(7);
        let cancel = CancellationToken::new();

        let got = entry.fetch(&table, Duration::from_secs(60), &cancel).await.unwrap();
        assert!(got.is_none());
        assert_eq!(entry.status(Duration::from_secs(60)), EntryStatus::Empty);
    }

    #[tokio::test]
    async fn test_fetch_honours_cancellation() {
        let table = InMemoryTable::with_records([Person::new(7, "Grace", 45)]);
        let entry = CacheEntry::<Person>::new(7);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = entry.fetch(&table, Duration::from_secs(60), &cancel).await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(entry.snapshot().is_none());
    }

    #[test]
    fn test_confirm_flush_adopts_server_copy() {
        let entry = CacheEntry::<Person>::staged(&Person::new(7, "Gus", 20)).unwrap();
        let flushed = entry.snapshot().unwrap();
        let mut stored = Person::new(7, "Gus", 20);
        stored.last_modified = Some("2024-01-01 00:00:00".to_string());

        assert!(entry.confirm_flush(&flushed, &stored).unwrap());
        assert!(!entry.has_changed());
        assert_eq!(entry.value().unwrap(), Some(stored));
    }

    #[test]
    fn test_confirm_flush_keeps_newer_stage() {
        let entry = CacheEntry::<Person>::staged(&Person::new(7, "Gus", 20)).unwrap();
        let flushed = entry.snapshot().unwrap();
        entry.stage(&Person::new(7, "Gus", 21)).unwrap();

        assert!(!entry.confirm_flush(&flushed, &Person::new(7, "Gus", 20)).unwrap());
        assert!(entry.has_changed());
        assert!(entry.is_persisted());
        assert_eq!(entry.value().unwrap().map(|p| p.age), Some(21));
    }

    #[tokio::test]
    async fn test_stage_during_fetch_survives_load() {
        let table = Arc::new(HeldGet {
            rows: InMemoryTable::with_records([Person::new(7, "Grace", 45)]),
            ..Default::default()
        });
        let entry = Arc::new(CacheEntry::from_record(&Person::new(7, "Grace", 45)).unwrap());
        std::thread::sleep(Duration::from_millis(10));

        let loading = {
            let (table, entry) = (Arc::clone(&table), Arc::clone(&entry));
            tokio::spawn(async move {
                entry
                    .fetch(table.as_ref(), Duration::from_millis(1), &CancellationToken::new())
                    .await
            })
        };
        table.entered.notified().await;
        entry.stage(&Person::new(7, "Grace", 46)).unwrap();
        table.release.notify_one();

        let got = loading.await.unwrap().unwrap().unwrap();
        assert_eq!(got.age, 46);
        assert!(entry.has_changed(), "local write must stay pending");
        assert_eq!(entry.value().unwrap().map(|p| p.age), Some(46));
    }

    #[tokio::test]
    async fn test_fetch_serves_dirty_snapshot_after_expiry() {
        let table = InMemoryTable::with_records([Person::new(7, "Grace", 45)]);
        let entry = CacheEntry::<Person>::staged(&Person::new(7, "Grace", 50)).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let got = entry
            .fetch(&table, Duration::from_millis(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(got.map(|p| p.age), Some(50));
        assert!(entry.has_changed());
    }

    #[test]
    fn test_dirty_status_outranks_expiry() {
        let entry = CacheEntry::<Person>::staged(&Person::new(7, "Gus", 20)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(entry.status(Duration::from_millis(1)), EntryStatus::Dirty);

        entry.set_value(&Person::new(7, "Gus", 20)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(entry.status(Duration::from_millis(1)), EntryStatus::Expired);
    }
}
