//! Flush planning: which entries diverged from storage.
//!
//! Compares each entry's current snapshot hash with the hash confirmed at
//! its last sync. Entries storage has never confirmed are reported
//! separately so callers can log inserts apart from updates.

use tablecache_core::Entity;

use crate::entry::CacheEntry;

/// The set of entries that need flushing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtySet<Id> {
    /// Entries whose snapshot changed since the last confirmed sync.
    pub modified: Vec<Id>,
    /// Entries staged locally that storage has never confirmed.
    pub unpersisted: Vec<Id>,
}

impl<Id: Clone + Ord> DirtySet<Id> {
    /// All identifiers needing a flush, sorted.
    pub fn ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self
            .modified
            .iter()
            .chain(&self.unpersisted)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Returns true if nothing needs flushing.
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.unpersisted.is_empty()
    }

    pub fn total(&self) -> usize {
        self.modified.len() + self.unpersisted.len()
    }
}

/// Computes the dirty set over `entries`.
pub fn compute_dirty_set<'a, E, I>(entries: I) -> DirtySet<E::Id>
where
    E: Entity,
    I: IntoIterator<Item = &'a CacheEntry<E>>,
{
    let mut modified = Vec::new();
    let mut unpersisted = Vec::new();

    for entry in entries {
        if !entry.has_changed() {
            continue;
        }
        if entry.is_persisted() {
            modified.push(entry.id().clone());
        } else {
            unpersisted.push(entry.id().clone());
        }
    }

    modified.sort();
    unpersisted.sort();
    DirtySet {
        modified,
        unpersisted,
    }
}
