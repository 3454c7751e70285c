//! Entity metadata and memoized SQL generation for tablecache.
//!
//! # Modules
//!
//! - [`error`]: CoreError enum with all configuration and caller failure modes
//! - [`value`]: SqlValue, the dialect-neutral parameter value
//! - [`entity`]: the Entity trait and static column registration
//! - [`descriptor`]: Column Descriptor Registry, built once per entity and dialect
//! - [`dialect`]: backend syntax variants (quoting, random rows, audit columns)
//! - [`shape`]: ShapeKey, the memoization key for parameter-set driven statements
//! - [`statement`]: StatementCache, the per-entity SQL text cache

pub mod descriptor;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod shape;
pub mod statement;
pub mod value;

// Re-export commonly used types
pub use descriptor::{columns, ColumnDescriptor, Columns};
pub use dialect::{AuditColumns, Dialect};
pub use entity::{ColumnDef, Entity, RecordId};
pub use error::CoreError;
pub use shape::ShapeKey;
pub use statement::{Operation, ShapeOperation, SqlCommand, StatementCache};
pub use value::SqlValue;

#[cfg(test)]
mod fixtures;
