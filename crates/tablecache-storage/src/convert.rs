//! Conversions between tablecache values and SQLite.
//!
//! Parameters go out as owned [`rusqlite::types::Value`]s bound by name.
//! Rows come back by mapping each physical column to its logical field and
//! deserializing the resulting JSON object with serde_json, so entities need
//! nothing beyond their serde derive and static column table.

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, Row, ToSql};
use serde_json::{Map, Number};

use tablecache_core::{Columns, Entity, SqlCommand, SqlValue};

use crate::error::StorageError;

/// Converts a parameter value to its SQLite storage class.
pub fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Bool(v) => Value::Integer(i64::from(*v)),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

/// Converts one SQLite cell to JSON.
pub fn cell_to_json(cell: ValueRef<'_>) -> Result<serde_json::Value, StorageError> {
    Ok(match cell {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(v) => serde_json::Value::Number(Number::from(v)),
        ValueRef::Real(v) => Number::from_f64(v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|e| StorageError::Decode {
                reason: format!("invalid UTF-8 in text column: {}", e),
            })?;
            serde_json::Value::String(text.to_string())
        }
        ValueRef::Blob(bytes) => serde_json::Value::Array(
            bytes
                .iter()
                .map(|b| serde_json::Value::Number(Number::from(*b)))
                .collect(),
        ),
    })
}

/// Maps a row to an entity. Columns without a descriptor are ignored.
pub fn row_to_record<E: Entity>(
    row: &Row<'_>,
    names: &[String],
    columns: &Columns<E>,
) -> Result<E, StorageError> {
    let mut object = Map::new();
    for (index, name) in names.iter().enumerate() {
        if let Some(descriptor) = columns.by_column(name) {
            object.insert(descriptor.field.to_string(), cell_to_json(row.get_ref(index)?)?);
        }
    }
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}

/// Binds `cmd`'s parameters by name for the duration of `f`.
fn with_named<R>(cmd: &SqlCommand, f: impl FnOnce(&[(&str, &dyn ToSql)]) -> R) -> R {
    let values: Vec<Value> = cmd.params.iter().map(|(_, v)| to_sqlite(v)).collect();
    let named: Vec<(&str, &dyn ToSql)> = cmd
        .params
        .iter()
        .zip(&values)
        .map(|((name, _), value)| (name.as_str(), value as &dyn ToSql))
        .collect();
    f(&named)
}

/// Runs a statement that returns no rows, yielding the changed-row count.
pub fn execute(conn: &Connection, cmd: &SqlCommand) -> Result<usize, StorageError> {
    let mut stmt = conn.prepare_cached(&cmd.text)?;
    with_named(cmd, |params| Ok(stmt.execute(params)?))
}

/// Runs a query and maps every row to an entity.
pub fn query<E: Entity>(
    conn: &Connection,
    columns: &Columns<E>,
    cmd: &SqlCommand,
) -> Result<Vec<E>, StorageError> {
    let mut stmt = conn.prepare_cached(&cmd.text)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    with_named(cmd, |params| {
        let mut rows = stmt.query(params)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_record(row, &names, columns)?);
        }
        Ok(records)
    })
}

/// Runs a query and returns the first column of the first row.
pub fn query_scalar(conn: &Connection, cmd: &SqlCommand) -> Result<Option<Value>, StorageError> {
    let mut stmt = conn.prepare_cached(&cmd.text)?;
    with_named(cmd, |params| {
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get::<_, Value>(0)?)),
            None => Ok(None),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_becomes_integer() {
        assert_eq!(to_sqlite(&SqlValue::Bool(true)), Value::Integer(1));
        assert_eq!(to_sqlite(&SqlValue::from("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn test_cells_to_json() {
        assert_eq!(cell_to_json(ValueRef::Integer(4)).unwrap(), serde_json::json!(4));
        assert_eq!(cell_to_json(ValueRef::Real(f64::NAN)).unwrap(), serde_json::Value::Null);
        assert_eq!(cell_to_json(ValueRef::Text(b"hi")).unwrap(), serde_json::json!("hi"));
        assert!(cell_to_json(ValueRef::Text(&[0xff, 0xfe])).is_err());
    }
}
