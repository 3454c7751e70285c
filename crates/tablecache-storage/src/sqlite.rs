//! SQLite implementation of [`TableAccessor`].
//!
//! [`SqliteTable`] persists one entity table in a SQLite database with WAL
//! mode and caller-supplied migrations. Every statement it runs comes from
//! its [`StatementCache`] built for [`Dialect::Sqlite`]. Blocking work runs
//! on tokio's blocking pool; the connection sits behind a mutex.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::types::Value;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;

use tablecache_core::{Dialect, Entity, SqlCommand, StatementCache};

use crate::convert;
use crate::error::StorageError;
use crate::traits::{TableAccessor, TableSession};

/// Largest id list bound in one `IN (...)` statement.
const ID_CHUNK: usize = 256;

/// SQLite-backed table accessor.
pub struct SqliteTable<E: Entity> {
    conn: Arc<Mutex<Connection>>,
    statements: Arc<StatementCache<E>>,
}

impl<E: Entity> SqliteTable<E> {
    /// Opens (or creates) a SQLite database at `path`, applying `migrations`.
    pub fn open(path: &str, migrations: &[&'static str]) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path, migrations)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory(migrations: &[&'static str]) -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory(migrations)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let statements = StatementCache::new(Dialect::Sqlite)?;
        tracing::info!(table = E::TABLE, "opened sqlite table");
        Ok(SqliteTable {
            conn: Arc::new(Mutex::new(conn)),
            statements: Arc::new(statements),
        })
    }

    /// The statement cache this table executes from.
    pub fn statements(&self) -> &Arc<StatementCache<E>> {
        &self.statements
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executes a generated statement directly, returning changed rows.
    pub fn execute(&self, cmd: &SqlCommand) -> Result<usize, StorageError> {
        convert::execute(&self.conn(), cmd)
    }

    /// Runs a generated query directly.
    pub fn query(&self, cmd: &SqlCommand) -> Result<Vec<E>, StorageError> {
        convert::query(&self.conn(), self.statements.columns(), cmd)
    }

    /// Runs a generated statement and returns its first scalar, e.g. the
    /// key produced by an `INSERT ... RETURNING`.
    pub fn scalar(&self, cmd: &SqlCommand) -> Result<Option<Value>, StorageError> {
        convert::query_scalar(&self.conn(), cmd)
    }

    /// Number of rows in the table.
    pub fn count(&self) -> Result<i64, StorageError> {
        match self.scalar(&self.statements.count())? {
            Some(Value::Integer(n)) => Ok(n),
            other => Err(StorageError::Decode {
                reason: format!("unexpected COUNT(*) result: {:?}", other),
            }),
        }
    }

    /// Runs `work` on the blocking pool, racing it against `cancel`.
    async fn blocking<T, W>(&self, work: W, cancel: &CancellationToken) -> Result<T, StorageError>
    where
        T: Send + 'static,
        W: FnOnce(&mut Connection, &StatementCache<E>) -> Result<T, StorageError> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let conn = Arc::clone(&self.conn);
        let statements = Arc::clone(&self.statements);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            work(&mut guard, &statements)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            joined = task => joined.map_err(|e| StorageError::Task(e.to_string()))?,
        }
    }
}

/// A transaction-scoped session over one SQLite table.
struct SqliteSession<'a, E: Entity> {
    conn: &'a Connection,
    statements: &'a StatementCache<E>,
}

impl<E: Entity> TableSession<E> for SqliteSession<'_, E> {
    fn get_many(&mut self, ids: &[E::Id]) -> Result<Vec<E>, StorageError> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let cmd = self.statements.get_many(chunk)?;
            records.extend(convert::query(self.conn, self.statements.columns(), &cmd)?);
        }
        Ok(records)
    }

    fn update(&mut self, records: &[E]) -> Result<(), StorageError> {
        for record in records {
            convert::execute(self.conn, &self.statements.insert_or_update(record))?;
        }
        Ok(())
    }

    fn all(&mut self) -> Result<Vec<E>, StorageError> {
        let mut records = convert::query(self.conn, self.statements.columns(), &self.statements.all())?;
        records.sort_by_key(|r| r.id());
        Ok(records)
    }
}

impl<E: Entity> TableAccessor<E> for SqliteTable<E> {
    async fn get(&self, id: &E::Id, cancel: &CancellationToken) -> Result<Option<E>, StorageError> {
        let id = id.clone();
        self.blocking(
            move |conn, statements| {
                let rows = convert::query(conn, statements.columns(), &statements.get(id))?;
                Ok(rows.into_iter().next())
            },
            cancel,
        )
        .await
    }

    async fn call<T, F>(&self, action: F, cancel: &CancellationToken) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TableSession<E>) -> Result<T, StorageError> + Send + 'static,
    {
        self.blocking(
            move |conn, statements| {
                let tx = conn.transaction()?;
                let out = {
                    let mut session = SqliteSession {
                        conn: &tx,
                        statements,
                    };
                    action(&mut session)?
                };
                tx.commit()?;
                Ok(out)
            },
            cancel,
        )
        .await
    }
}
