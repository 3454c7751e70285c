//! Rendering of generated statements for the `sql` subcommand.

use clap::ValueEnum;

use tablecache_core::{CoreError, SqlCommand, StatementCache};

use crate::kv::KvRecord;

/// Statement families the `sql` subcommand can print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SqlOp {
    All,
    Count,
    First,
    Last,
    SortedIds,
    Single,
    Get,
    Delete,
    Next,
    NextId,
    Previous,
    PreviousId,
    Random,
    RandomN,
    RandomByUser,
    Insert,
    TryInsert,
    InsertOrUpdate,
    Update,
    Where,
    WhereAny,
    WhereIds,
    Find,
    Exists,
    DeleteMatching,
    GetMany,
    DeleteMany,
}

/// Builds the statement for `op` over a sample record.
pub fn render(statements: &StatementCache<KvRecord>, op: SqlOp) -> Result<SqlCommand, CoreError> {
    let sample = KvRecord::new("greeting", "hello");
    let id = || sample.key.clone();
    let filter = [("value", "hello"), ("owner_id", "1")];

    let cmd = match op {
        SqlOp::All => statements.all(),
        SqlOp::Count => statements.count(),
        SqlOp::First => statements.first(),
        SqlOp::Last => statements.last(),
        SqlOp::SortedIds => statements.sorted_ids(),
        SqlOp::Single => statements.single(id()),
        SqlOp::Get => statements.get(id()),
        SqlOp::Delete => statements.delete(id()),
        SqlOp::Next => statements.next(id()),
        SqlOp::NextId => statements.next_id(id()),
        SqlOp::Previous => statements.previous(id()),
        SqlOp::PreviousId => statements.previous_id(id()),
        SqlOp::Random => statements.random(),
        SqlOp::RandomN => statements.random_n(3),
        SqlOp::RandomByUser => statements.random_by_user(1)?,
        SqlOp::Insert => statements.insert(&sample),
        SqlOp::TryInsert => statements.try_insert(&sample),
        SqlOp::InsertOrUpdate => statements.insert_or_update(&sample),
        SqlOp::Update => statements.update(&sample),
        SqlOp::Where => statements.filter(true, filter)?,
        SqlOp::WhereAny => statements.filter(false, filter)?,
        SqlOp::WhereIds => statements.filter_ids("value", "hello")?,
        SqlOp::Find => statements.find(true, filter)?,
        SqlOp::Exists => statements.exists(true, filter)?,
        SqlOp::DeleteMatching => statements.delete_matching(true, filter)?,
        SqlOp::GetMany => statements.get_many(&[id(), "farewell".to_string()])?,
        SqlOp::DeleteMany => statements.delete_many(&[id(), "farewell".to_string()])?,
    };
    Ok(cmd)
}

/// Formats a command as its text followed by one `-- @name = value` line
/// per parameter.
pub fn format_command(cmd: &SqlCommand) -> String {
    let mut out = cmd.text.to_string();
    for (name, value) in &cmd.params {
        out.push_str(&format!("\n  -- {} = {}", name, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablecache_core::Dialect;

    #[test]
    fn test_every_op_renders_for_postgres_and_sqlite() {
        for dialect in [Dialect::Postgres, Dialect::Sqlite] {
            let statements = StatementCache::<KvRecord>::new(dialect).unwrap();
            for op in SqlOp::value_variants() {
                assert!(render(&statements, *op).is_ok(), "{:?} on {}", op, dialect);
            }
        }
    }

    #[test]
    fn test_sqlserver_needs_pascal_owner_column() {
        let statements = StatementCache::<KvRecord>::new(Dialect::SqlServer).unwrap();
        assert!(render(&statements, SqlOp::Update).is_ok());
        assert!(render(&statements, SqlOp::RandomByUser).is_err());
    }

    #[test]
    fn test_format_lists_params() {
        let statements = StatementCache::<KvRecord>::new(Dialect::Sqlite).unwrap();
        let text = format_command(&render(&statements, SqlOp::Get).unwrap());
        assert!(text.starts_with("SELECT"));
        assert!(text.ends_with("-- @key = 'greeting'"));
    }
}
