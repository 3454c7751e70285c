//! Core error types for tablecache-core.
//!
//! Configuration errors (missing key, unsupported dialect) are fatal and
//! raised while building descriptors or statements. Caller errors (unknown
//! column, empty filter) indicate a programming mistake at the call site.

use thiserror::Error;

/// Errors produced by the tablecache-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The entity registered no column marked as key.
    #[error("entity '{entity}' declares no key column")]
    MissingKey { entity: &'static str },

    /// The entity registered the same logical field twice.
    #[error("entity '{entity}' declares field '{field}' more than once")]
    DuplicateField {
        entity: &'static str,
        field: &'static str,
    },

    /// A descriptor lookup referenced a field or column the entity does not have.
    #[error("missing column: '{column}' is not mapped on entity '{entity}'")]
    MissingColumn {
        entity: &'static str,
        column: String,
    },

    /// A filter builder was called with a column the entity does not have.
    #[error("invalid column: '{column}' is not a column of entity '{entity}'")]
    InvalidColumn {
        entity: &'static str,
        column: String,
    },

    /// A dialect name that no statement generator supports.
    #[error("unsupported dialect: '{name}'")]
    UnsupportedDialect { name: String },

    /// A filter named the same column twice.
    #[error("filter on entity '{entity}' names column '{column}' more than once")]
    DuplicateParameter {
        entity: &'static str,
        column: String,
    },

    /// A shape-keyed statement was requested with no parameters.
    #[error("filter on entity '{entity}' has no parameters")]
    EmptyFilter { entity: &'static str },

    /// An id-list statement was requested with no ids.
    #[error("id list for entity '{entity}' is empty")]
    EmptyIdList { entity: &'static str },
}
