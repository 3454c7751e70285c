//! Shared test entity and a recording table accessor that can be held,
//! stalled or failed on demand.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use tablecache_core::{ColumnDef, Entity};
use tablecache_storage::{CancellationToken, InMemoryTable, StorageError, TableAccessor, TableSession};

pub const ITEMS_SCHEMA: &str = "CREATE TABLE items (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    qty INTEGER NOT NULL,
    last_modified TEXT
);";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub qty: i64,
    pub last_modified: Option<String>,
}

impl Item {
    pub fn new(id: i64, name: &str, qty: i64) -> Self {
        Item {
            id,
            name: name.to_string(),
            qty,
            last_modified: None,
        }
    }
}

impl Entity for Item {
    const TABLE: &'static str = "items";
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }

    fn columns() -> &'static [ColumnDef<Self>] {
        const COLUMNS: &[ColumnDef<Item>] = &[
            ColumnDef::key("id", "id", |i: &Item| i.id.into()),
            ColumnDef::new("name", "name", |i: &Item| i.name.clone().into()),
            ColumnDef::new("qty", "qty", |i: &Item| i.qty.into()),
            ColumnDef::new("last_modified", "last_modified", |i: &Item| {
                i.last_modified.clone().into()
            }),
        ];
        COLUMNS
    }
}

/// Parks the next accessor operation once armed, until released.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<GateState>,
}

#[derive(Default)]
struct GateState {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Holds the next operation that passes this gate.
    pub fn arm(&self) {
        self.inner.armed.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held operation is parked at the gate.
    pub async fn entered(&self) {
        self.inner.entered.notified().await;
    }

    pub fn release(&self) {
        self.inner.release.notify_one();
    }

    async fn pass(&self, cancel: &CancellationToken) -> Result<(), StorageError> {
        if !self.inner.armed.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.entered.notify_one();
        tokio::select! {
            _ = self.inner.release.notified() => Ok(()),
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
        }
    }
}

/// An in-memory table that records every `update` batch and can be told
/// to fail, to hold one `get` or `call`, or to hang every `call` until
/// cancelled.
#[derive(Clone, Default)]
pub struct RecordingTable {
    pub rows: InMemoryTable<Item>,
    pub get_gate: Gate,
    pub call_gate: Gate,
    updates: Arc<Mutex<Vec<Vec<i64>>>>,
    failing: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl RecordingTable {
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        RecordingTable {
            rows: InMemoryTable::with_records(items),
            ..Default::default()
        }
    }

    /// Ids of each `update` batch received so far.
    pub fn updates(&self) -> Vec<Vec<i64>> {
        self.updates.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every later `call` waits for its cancellation token.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }
}

struct Recording<'a> {
    inner: &'a mut dyn TableSession<Item>,
    updates: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl TableSession<Item> for Recording<'_> {
    fn get_many(&mut self, ids: &[i64]) -> Result<Vec<Item>, StorageError> {
        self.inner.get_many(ids)
    }

    fn update(&mut self, records: &[Item]) -> Result<(), StorageError> {
        self.updates
            .lock()
            .unwrap()
            .push(records.iter().map(|r| r.id).collect());
        self.inner.update(records)
    }

    fn all(&mut self) -> Result<Vec<Item>, StorageError> {
        self.inner.all()
    }
}

impl TableAccessor<Item> for RecordingTable {
    async fn get(&self, id: &i64, cancel: &CancellationToken) -> Result<Option<Item>, StorageError> {
        self.get_gate.pass(cancel).await?;
        self.rows.get(id, cancel).await
    }

    async fn call<T, F>(&self, action: F, cancel: &CancellationToken) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TableSession<Item>) -> Result<T, StorageError> + Send + 'static,
    {
        if self.stalled.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err(StorageError::Cancelled);
        }
        self.call_gate.pass(cancel).await?;
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Task("injected failure".to_string()));
        }
        let updates = Arc::clone(&self.updates);
        self.rows
            .call(
                move |session| {
                    let mut recording = Recording {
                        inner: session,
                        updates,
                    };
                    action(&mut recording)
                },
                cancel,
            )
            .await
    }
}
