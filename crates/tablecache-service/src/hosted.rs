//! Hosted lifecycle for a record cache.
//!
//! [`CacheService`] owns the background refresh task: `start` spawns
//! [`RecordCache::run`] on the tokio runtime, `stop` cancels it and waits
//! for the final flush, abandoning that flush if the caller's token fires
//! first. Both are safe to call repeatedly.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tablecache_core::Entity;
use tablecache_storage::TableAccessor;

use crate::error::ServiceError;
use crate::record_cache::RecordCache;

struct Running {
    cancel: CancellationToken,
    /// Aborts the final flush; not linked to the shutdown token.
    flush: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background refresh service for one [`RecordCache`].
pub struct CacheService<E: Entity, A> {
    cache: Arc<RecordCache<E, A>>,
    running: Mutex<Option<Running>>,
}

impl<E, A> CacheService<E, A>
where
    E: Entity,
    A: TableAccessor<E>,
{
    pub fn new(cache: Arc<RecordCache<E, A>>) -> Self {
        CacheService {
            cache,
            running: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<RecordCache<E, A>> {
        &self.cache
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawns the refresh loop. The loop also stops when `shutdown` is
    /// cancelled.
    pub fn start(&self, shutdown: &CancellationToken) -> Result<(), ServiceError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(ServiceError::AlreadyRunning);
        }

        let cancel = shutdown.child_token();
        let flush = CancellationToken::new();
        let cache = Arc::clone(&self.cache);
        let (token, flush_token) = (cancel.clone(), flush.clone());
        let handle = tokio::spawn(async move { cache.run(token, flush_token).await });

        tracing::info!(table = E::TABLE, "cache service started");
        *running = Some(Running {
            cancel,
            flush,
            handle,
        });
        Ok(())
    }

    /// Cancels the refresh loop and waits for its final flush. If `cancel`
    /// fires first the flush is abandoned and unflushed writes stay dirty in
    /// the cache. Does nothing when the service is not running.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running {
            cancel: stop_loop,
            flush,
            mut handle,
        }) = running
        else {
            return Ok(());
        };

        stop_loop.cancel();
        let joined = tokio::select! {
            joined = &mut handle => joined,
            _ = cancel.cancelled() => {
                tracing::warn!(table = E::TABLE, "abandoning final flush");
                flush.cancel();
                handle.await
            }
        };
        joined.map_err(|e| ServiceError::Task(e.to_string()))?;
        tracing::info!(table = E::TABLE, "cache service stopped");
        Ok(())
    }
}
