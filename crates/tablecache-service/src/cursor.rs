//! Pull-based iteration over a live record cache.

use tokio_util::sync::CancellationToken;

use tablecache_core::Entity;
use tablecache_storage::TableAccessor;

use crate::error::ServiceError;
use crate::record_cache::RecordCache;

/// Walks a [`RecordCache`] in identifier order, running a refresh cycle
/// before every step so each record comes from the current table.
///
/// The position is the last identifier yielded, so records inserted or
/// removed between steps are picked up or skipped naturally.
pub struct RecordCursor<'a, E: Entity, A> {
    cache: &'a RecordCache<E, A>,
    position: Option<E::Id>,
}

impl<'a, E, A> RecordCursor<'a, E, A>
where
    E: Entity,
    A: TableAccessor<E>,
{
    pub(crate) fn new(cache: &'a RecordCache<E, A>) -> Self {
        RecordCursor {
            cache,
            position: None,
        }
    }

    /// The identifier of the record last returned by [`advance`](Self::advance).
    pub fn position(&self) -> Option<&E::Id> {
        self.position.as_ref()
    }

    /// Refreshes the cache, then returns the record following the current
    /// position, or `None` once the end is reached.
    pub async fn advance(&mut self, cancel: &CancellationToken) -> Result<Option<E>, ServiceError> {
        self.cache.refresh(cancel).await?;

        let next = self
            .cache
            .ids()
            .into_iter()
            .find(|id| self.position.as_ref().map_or(true, |pos| id > pos));
        let Some(id) = next else {
            return Ok(None);
        };

        let record = self.cache.get(&id)?;
        self.position = Some(id);
        Ok(record)
    }

    /// Starts over from the first record.
    pub fn reset(&mut self) {
        self.position = None;
    }
}
