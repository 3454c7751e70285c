//! Backend syntax variants.
//!
//! [`Dialect`] is consulted only while generating statement text, never on
//! a cache lookup. Parsing an unknown dialect name is a configuration error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Supported SQL backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    SqlServer,
    Sqlite,
}

/// Column names the backend convention reserves for audit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditColumns {
    pub created_by: &'static str,
    pub date_created: &'static str,
    pub last_modified: &'static str,
    pub owner: &'static str,
}

const SNAKE_AUDIT: AuditColumns = AuditColumns {
    created_by: "created_by",
    date_created: "date_created",
    last_modified: "last_modified",
    owner: "owner_id",
};

const PASCAL_AUDIT: AuditColumns = AuditColumns {
    created_by: "CreatedBy",
    date_created: "DateCreated",
    last_modified: "LastModified",
    owner: "OwnerID",
};

impl Dialect {
    /// Quotes an identifier, doubling any embedded closing quote.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
        }
    }

    /// Named placeholder for a parameter.
    pub fn parameter(self, name: &str) -> String {
        format!("@{}", name)
    }

    /// Expression ordering rows randomly.
    pub fn random_order(self) -> &'static str {
        match self {
            Dialect::Postgres | Dialect::Sqlite => "RANDOM()",
            Dialect::SqlServer => "NEWID()",
        }
    }

    /// Expression for the current server time.
    pub fn now(self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    /// Audit column naming convention for this backend.
    pub fn audit_columns(self) -> AuditColumns {
        match self {
            Dialect::Postgres | Dialect::Sqlite => SNAKE_AUDIT,
            Dialect::SqlServer => PASCAL_AUDIT,
        }
    }

    /// Builds a row-limited `SELECT`. `tail` holds any WHERE / ORDER BY text
    /// and starts with a space when non-empty.
    pub fn select_limited(self, projection: &str, table: &str, tail: &str, limit: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                format!("SELECT {} FROM {}{} LIMIT {}", projection, table, tail, limit)
            }
            Dialect::SqlServer => {
                format!("SELECT TOP ({}) {} FROM {}{}", limit, projection, table, tail)
            }
        }
    }

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::SqlServer => "sqlserver",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "sqlite" => Ok(Dialect::Sqlite),
            _ => Err(CoreError::UnsupportedDialect {
                name: s.to_string(),
            }),
        }
    }
}
