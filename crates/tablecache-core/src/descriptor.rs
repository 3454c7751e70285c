//! Column Descriptor Registry.
//!
//! [`columns`] builds the descriptor mapping for an entity type and dialect
//! exactly once per process and hands out the shared, read-only result on
//! every later call. Building validates the static registration: at least
//! one key column and no duplicated logical field names.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::dialect::Dialect;
use crate::entity::Entity;
use crate::error::CoreError;
use crate::value::SqlValue;

/// Column metadata for one persisted field.
pub struct ColumnDescriptor<E> {
    /// Logical field name.
    pub field: &'static str,
    /// Physical column name, unquoted.
    pub column: &'static str,
    /// Physical column name quoted for the registry's dialect.
    pub quoted: String,
    /// Part of the record identity.
    pub key: bool,
    accessor: fn(&E) -> SqlValue,
}

impl<E> ColumnDescriptor<E> {
    /// Reads this column's value from a record.
    pub fn value(&self, record: &E) -> SqlValue {
        (self.accessor)(record)
    }
}

impl<E> fmt::Debug for ColumnDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("field", &self.field)
            .field("column", &self.column)
            .field("quoted", &self.quoted)
            .field("key", &self.key)
            .finish()
    }
}

/// Descriptor mapping for one entity type and dialect, keyed by field name.
pub struct Columns<E> {
    dialect: Dialect,
    by_field: IndexMap<&'static str, ColumnDescriptor<E>>,
}

impl<E: Entity> Columns<E> {
    fn build(dialect: Dialect) -> Result<Self, CoreError> {
        let mut by_field = IndexMap::new();
        for def in E::columns() {
            let descriptor = ColumnDescriptor {
                field: def.field,
                column: def.column,
                quoted: dialect.quote_identifier(def.column),
                key: def.key,
                accessor: def.accessor,
            };
            if by_field.insert(def.field, descriptor).is_some() {
                return Err(CoreError::DuplicateField {
                    entity: E::TABLE,
                    field: def.field,
                });
            }
        }

        if !by_field.values().any(|d: &ColumnDescriptor<E>| d.key) {
            return Err(CoreError::MissingKey { entity: E::TABLE });
        }

        tracing::debug!(
            entity = E::TABLE,
            %dialect,
            columns = by_field.len(),
            "built column descriptors"
        );
        Ok(Columns { dialect, by_field })
    }

    /// Looks up a descriptor by logical field name.
    pub fn get(&self, field: &str) -> Result<&ColumnDescriptor<E>, CoreError> {
        self.by_field.get(field).ok_or_else(|| CoreError::MissingColumn {
            entity: E::TABLE,
            column: field.to_string(),
        })
    }

    /// Looks up a descriptor by physical column name (case-insensitive).
    pub fn by_column(&self, column: &str) -> Option<&ColumnDescriptor<E>> {
        self.by_field
            .values()
            .find(|d| d.column.eq_ignore_ascii_case(column))
    }

    /// The first declared key column.
    pub fn primary_key(&self) -> &ColumnDescriptor<E> {
        // build() rejects entities without a key column
        self.keys()
            .next()
            .unwrap_or_else(|| unreachable!("descriptor mapping without key column"))
    }

    /// All key columns in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &ColumnDescriptor<E>> {
        self.by_field.values().filter(|d| d.key)
    }

    /// All columns in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnDescriptor<E>> {
        self.by_field.values()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.by_field.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.by_field.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_field.is_empty()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

type Registry = DashMap<(TypeId, Dialect), Arc<dyn Any + Send + Sync>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// Returns the shared descriptor mapping for `E` under `dialect`, building it
/// on first use.
pub fn columns<E: Entity>(dialect: Dialect) -> Result<Arc<Columns<E>>, CoreError> {
    let key = (TypeId::of::<E>(), dialect);

    let cached = registry().get(&key).map(|entry| Arc::clone(entry.value()));
    if let Some(found) = cached.and_then(|any| any.downcast::<Columns<E>>().ok()) {
        return Ok(found);
    }

    let built: Arc<Columns<E>> = Arc::new(Columns::build(dialect)?);
    let stored = Arc::clone(
        registry()
            .entry(key)
            .or_insert_with(|| Arc::clone(&built) as Arc<dyn Any + Send + Sync>)
            .value(),
    );
    Ok(stored.downcast::<Columns<E>>().unwrap_or(built))
}
