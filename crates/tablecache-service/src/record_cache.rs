//! Table-level record cache with a periodic refresh cycle.
//!
//! [`RecordCache`] keeps one [`CacheEntry`] per identifier in a [`DashMap`],
//! so foreground reads and writes never take a table-wide lock. A refresh
//! cycle runs three steps in order:
//!
//! 1. Flush: entries whose snapshot no longer hashes to the confirmed hash
//!    are upserted through the accessor, then read back by id so that
//!    server-side stamps (e.g. `last_modified`) land in the cache.
//! 2. Reload: the full table is read in a single transaction.
//! 3. Repopulate: the map is replaced by the reloaded set. Entries staged
//!    while the cycle was in flight survive and flush on the next cycle.
//!
//! Cycles never overlap. [`RecordCache::run`] drives them from a tokio
//! interval, logs failed cycles and keeps going, and flushes one last time
//! when cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use tablecache_core::Entity;
use tablecache_storage::{compute_dirty_set, CacheEntry, DirtySet, StorageError, TableAccessor};

use crate::config::CacheConfig;
use crate::cursor::RecordCursor;
use crate::error::ServiceError;

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Records pushed to storage in the flush step.
    pub flushed: usize,
    /// Records read by the full reload.
    pub loaded: usize,
    /// Entries kept because they were staged during the cycle.
    pub retained: usize,
}

/// In-process snapshot of one entity table.
pub struct RecordCache<E: Entity, A> {
    entries: DashMap<E::Id, Arc<CacheEntry<E>>>,
    table: Arc<A>,
    config: CacheConfig,
    /// Held for the duration of a flush or refresh.
    cycle: tokio::sync::Mutex<()>,
}

impl<E, A> RecordCache<E, A>
where
    E: Entity,
    A: TableAccessor<E>,
{
    /// Fails with [`ServiceError::InvalidConfig`] when `config` cannot
    /// drive a refresh loop.
    pub fn new(table: Arc<A>, config: CacheConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        Ok(RecordCache {
            entries: DashMap::new(),
            table,
            config,
            cycle: tokio::sync::Mutex::new(()),
        })
    }

    pub fn table(&self) -> &Arc<A> {
        &self.table
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn entry(&self, id: &E::Id) -> Option<Arc<CacheEntry<E>>> {
        self.entries.get(id).map(|e| Arc::clone(e.value()))
    }

    fn snapshot_entries(&self) -> Vec<Arc<CacheEntry<E>>> {
        self.entries.iter().map(|e| Arc::clone(e.value())).collect()
    }

    // -------------------------------------------------------------------
    // In-memory operations
    // -------------------------------------------------------------------

    /// Stores `record` as confirmed by storage: updates the existing entry
    /// or inserts a fresh one.
    pub fn add_or_update(&self, record: &E) -> Result<(), ServiceError> {
        match self.entries.entry(record.id()) {
            Entry::Occupied(existing) => existing.get().set_value(record)?,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(CacheEntry::from_record(record)?));
            }
        }
        Ok(())
    }

    /// Applies [`add_or_update`](Self::add_or_update) to every present
    /// record, skipping `None`. Returns how many were applied.
    pub fn add_or_update_all<I>(&self, records: I) -> Result<usize, ServiceError>
    where
        I: IntoIterator<Item = Option<E>>,
    {
        let mut applied = 0;
        for record in records.into_iter().flatten() {
            self.add_or_update(&record)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Asynchronous variant of [`add_or_update_all`](Self::add_or_update_all).
    pub async fn add_or_update_stream<S>(&self, records: S) -> Result<usize, ServiceError>
    where
        S: Stream<Item = Option<E>>,
    {
        let mut records = std::pin::pin!(records);
        let mut applied = 0;
        while let Some(item) = records.next().await {
            if let Some(record) = item {
                self.add_or_update(&record)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Records a local modification. The entry is dirty until the next
    /// flush persists it.
    pub fn stage(&self, record: &E) -> Result<(), ServiceError> {
        match self.entries.entry(record.id()) {
            Entry::Occupied(existing) => existing.get().stage(record)?,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(CacheEntry::staged(record)?));
            }
        }
        Ok(())
    }

    /// Drops the entry for `id` from memory. Storage is not touched.
    pub fn try_remove(&self, id: &E::Id) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &E::Id) -> bool {
        self.entries.contains_key(id)
    }

    pub fn contains_record(&self, record: &E) -> bool {
        self.contains(&record.id())
    }

    /// The in-memory record for `id`, regardless of expiry.
    pub fn get(&self, id: &E::Id) -> Result<Option<E>, ServiceError> {
        match self.entry(id) {
            Some(entry) => Ok(entry.value()?),
            None => Ok(None),
        }
    }

    /// Returns the unexpired snapshot for `id`, or loads it from storage.
    ///
    /// Dirty entries are served from memory so a pending write is never
    /// replaced by the stored copy, including one staged while the load is
    /// in flight. A record storage does not have leaves the cache unchanged.
    pub async fn get_or_fetch(
        &self,
        id: &E::Id,
        cancel: &CancellationToken,
    ) -> Result<Option<E>, ServiceError> {
        let entry = self
            .entry(id)
            .unwrap_or_else(|| Arc::new(CacheEntry::new(id.clone())));
        let Some(record) = entry.fetch(self.table.as_ref(), self.config.expiry, cancel).await? else {
            return Ok(None);
        };

        match self.entries.entry(id.clone()) {
            // Staged or reloaded under another entry meanwhile; that one wins.
            Entry::Occupied(current) if !Arc::ptr_eq(current.get(), &entry) => {
                Ok(current.get().value()?.or(Some(record)))
            }
            Entry::Occupied(_) => Ok(Some(record)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(Some(record))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifiers currently cached, sorted.
    pub fn ids(&self) -> Vec<E::Id> {
        let mut ids: Vec<E::Id> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Every cached record, ordered by identifier.
    pub fn values(&self) -> Result<Vec<E>, ServiceError> {
        let mut entries = self.snapshot_entries();
        entries.sort_by(|a, b| a.id().cmp(b.id()));

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(record) = entry.value()? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Entries that diverged from their last confirmed snapshot.
    pub fn dirty(&self) -> DirtySet<E::Id> {
        let entries = self.snapshot_entries();
        compute_dirty_set(entries.iter().map(Arc::as_ref))
    }

    /// A cursor that refreshes before every step.
    pub fn cursor(&self) -> RecordCursor<'_, E, A> {
        RecordCursor::new(self)
    }

    // -------------------------------------------------------------------
    // Synchronization with storage
    // -------------------------------------------------------------------

    /// Pushes every dirty entry to storage and adopts what storage returns.
    /// Returns the number of records flushed.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<usize, ServiceError> {
        let _cycle = self.cycle.lock().await;
        self.flush_dirty(cancel).await
    }

    async fn flush_dirty(&self, cancel: &CancellationToken) -> Result<usize, ServiceError> {
        let dirty = self.dirty();
        if dirty.is_clean() {
            return Ok(0);
        }

        // Pin each snapshot as it is sent so confirmation can tell whether it
        // was staged again meanwhile.
        let mut pending: HashMap<E::Id, (Arc<CacheEntry<E>>, Arc<str>)> = HashMap::new();
        let mut records: Vec<E> = Vec::with_capacity(dirty.total());
        for id in dirty.ids() {
            let Some(entry) = self.entry(&id) else {
                continue;
            };
            let Some(flushed) = entry.snapshot() else {
                continue;
            };
            records.push(serde_json::from_str(&flushed).map_err(StorageError::from)?);
            pending.insert(id, (entry, flushed));
        }

        let ids: Vec<E::Id> = pending.keys().cloned().collect();
        let stored = self
            .table
            .call(
                move |session| {
                    session.update(&records)?;
                    session.get_many(&ids)
                },
                cancel,
            )
            .await?;

        for record in stored {
            let id = record.id();
            if let Some((entry, snapshot)) = pending.get(&id) {
                if !entry.confirm_flush(snapshot, &record)? {
                    tracing::debug!(table = E::TABLE, id = %id, "entry restaged during flush");
                }
            }
        }

        tracing::info!(
            table = E::TABLE,
            modified = dirty.modified.len(),
            inserted = dirty.unpersisted.len(),
            "flushed dirty records"
        );
        Ok(pending.len())
    }

    /// Runs one full cycle: flush, reload everything, repopulate.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshReport, ServiceError> {
        let _cycle = self.cycle.lock().await;
        let flushed = self.flush_dirty(cancel).await?;

        let loaded = self.table.call(|session| session.all(), cancel).await?;
        let report = self.repopulate(loaded, flushed)?;

        tracing::debug!(
            table = E::TABLE,
            flushed = report.flushed,
            loaded = report.loaded,
            retained = report.retained,
            "refresh cycle complete"
        );
        Ok(report)
    }

    fn repopulate(&self, loaded: Vec<E>, flushed: usize) -> Result<RefreshReport, ServiceError> {
        let mut fresh = Vec::with_capacity(loaded.len());
        for record in &loaded {
            fresh.push((record.id(), Arc::new(CacheEntry::from_record(record)?)));
        }

        self.entries.retain(|_, entry| entry.has_changed());
        let retained = self.entries.len();
        for (id, entry) in fresh {
            self.entries.entry(id).or_insert(entry);
        }

        Ok(RefreshReport {
            flushed,
            loaded: loaded.len(),
            retained,
        })
    }

    /// Refreshes every `refresh_interval` until `cancel` fires, then flushes
    /// once more. A failed cycle is logged and the loop moves on to the next
    /// tick.
    ///
    /// The final flush runs until it completes or `flush_cancel` fires; in
    /// the latter case the writes left behind are logged.
    pub async fn run(&self, cancel: CancellationToken, flush_cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.refresh_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            table = E::TABLE,
            interval_ms = self.config.refresh_interval.as_millis() as u64,
            "refresh loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            match self.refresh(&cancel).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() && cancel.is_cancelled() => break,
                Err(e) => {
                    tracing::error!(critical = true, table = E::TABLE, error = %e, "refresh cycle failed");
                }
            }
        }

        match self.flush(&flush_cancel).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(table = E::TABLE, flushed = n, "flushed on shutdown"),
            Err(e) => {
                let dirty = self.dirty();
                tracing::error!(
                    critical = true,
                    table = E::TABLE,
                    error = %e,
                    unflushed = dirty.total(),
                    ids = ?dirty.ids(),
                    "final flush failed; local writes not persisted"
                );
            }
        }
        tracing::info!(table = E::TABLE, "refresh loop stopped");
    }
}
