//! Entity registration.
//!
//! Each persisted type implements [`Entity`] and hands out a static table of
//! [`ColumnDef`]s. This table is the only source of column metadata; nothing
//! is discovered by inspecting values at runtime.

use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::value::SqlValue;

/// Bound for record identifiers.
pub trait RecordId:
    Clone
    + Eq
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + Into<SqlValue>
    + Send
    + Sync
    + 'static
{
}

impl<T> RecordId for T where
    T: Clone
        + Eq
        + Ord
        + Hash
        + fmt::Debug
        + fmt::Display
        + Serialize
        + DeserializeOwned
        + Into<SqlValue>
        + Send
        + Sync
        + 'static
{
}

/// One statically registered column of an entity.
pub struct ColumnDef<E> {
    /// Logical field name, as serde sees it.
    pub field: &'static str,
    /// Physical column name, unquoted.
    pub column: &'static str,
    /// Part of the record identity.
    pub key: bool,
    /// Reads the field value from a record.
    pub accessor: fn(&E) -> SqlValue,
}

impl<E> ColumnDef<E> {
    /// Registers a non-key column.
    pub const fn new(field: &'static str, column: &'static str, accessor: fn(&E) -> SqlValue) -> Self {
        ColumnDef {
            field,
            column,
            key: false,
            accessor,
        }
    }

    /// Registers a key column.
    pub const fn key(field: &'static str, column: &'static str, accessor: fn(&E) -> SqlValue) -> Self {
        ColumnDef {
            field,
            column,
            key: true,
            accessor,
        }
    }
}

impl<E> Clone for ColumnDef<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for ColumnDef<E> {}

impl<E> fmt::Debug for ColumnDef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("field", &self.field)
            .field("column", &self.column)
            .field("key", &self.key)
            .finish()
    }
}

/// A record type persisted in one table.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Physical table name, unquoted.
    const TABLE: &'static str;

    /// Identifier type (the value of the primary key column).
    type Id: RecordId;

    /// Returns this record's identifier.
    fn id(&self) -> Self::Id;

    /// Returns the static column table, in declaration order.
    fn columns() -> &'static [ColumnDef<Self>];
}
