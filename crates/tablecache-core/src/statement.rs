//! Statement Cache: memoized SQL text per entity type and dialect.
//!
//! Fixed operations (all rows, count, by-id, insert, update, ...) are cached
//! under an [`Operation`] slot. Operations driven by a caller-supplied
//! parameter set are cached under a [`ShapeOperation`] plus a [`ShapeKey`].
//! Cached text never contains values; each call pairs the text with the
//! caller's values in a fresh [`SqlCommand`].
//!
//! Lookups go through `DashMap`. A miss runs the builder without holding any
//! lock, so two racing misses may both build; both produce identical text
//! and the last insert wins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::descriptor::{columns, ColumnDescriptor, Columns};
use crate::dialect::Dialect;
use crate::entity::Entity;
use crate::error::CoreError;
use crate::shape::ShapeKey;
use crate::value::SqlValue;

/// Fixed statement slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    All,
    First,
    Last,
    SortedIds,
    Count,
    Single,
    GetById,
    DeleteById,
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
}

/// Statement families keyed by parameter shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeOperation {
    /// `SELECT *` filtered by the shape.
    Where,
    /// `SELECT <key>` filtered by the shape.
    WhereId,
    /// First row matching the shape.
    Find,
    Exists,
    Delete,
    GetByIds,
    DeleteByIds,
}

/// Generated SQL text paired with parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    /// Cached statement text, shared with the cache.
    pub text: Arc<str>,
    /// Named parameters, including the placeholder prefix (`@name`).
    pub params: Vec<(String, SqlValue)>,
}

impl SqlCommand {
    fn new(text: Arc<str>, params: Vec<(String, SqlValue)>) -> Self {
        SqlCommand { text, params }
    }
}

/// Per-entity, per-dialect statement cache.
pub struct StatementCache<E: Entity> {
    dialect: Dialect,
    columns: Arc<Columns<E>>,
    table: String,
    fixed: DashMap<Operation, Arc<str>>,
    shaped: DashMap<(ShapeOperation, ShapeKey), Arc<str>>,
    builds: AtomicUsize,
}

impl<E: Entity> StatementCache<E> {
    /// Creates an empty cache, resolving the entity's descriptors.
    pub fn new(dialect: Dialect) -> Result<Self, CoreError> {
        let columns = columns::<E>(dialect)?;
        Ok(StatementCache {
            dialect,
            columns,
            table: dialect.quote_identifier(E::TABLE),
            fixed: DashMap::new(),
            shaped: DashMap::new(),
            builds: AtomicUsize::new(0),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn columns(&self) -> &Arc<Columns<E>> {
        &self.columns
    }

    /// Quoted table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of cached statement texts.
    pub fn len(&self) -> usize {
        self.fixed.len() + self.shaped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times a builder has run.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------
    // Memoization
    // -------------------------------------------------------------------

    /// Returns the text cached under `op`, building it on a miss.
    pub fn get_or_build<F>(&self, op: Operation, builder: F) -> Arc<str>
    where
        F: FnOnce() -> String,
    {
        if let Some(text) = self.fixed.get(&op) {
            return Arc::clone(text.value());
        }
        let text = self.run_builder(builder);
        tracing::trace!(entity = E::TABLE, ?op, sql = %text, "cached statement");
        self.fixed.insert(op, Arc::clone(&text));
        text
    }

    /// Returns the text cached under `(op, key)`, building it on a miss.
    pub fn get_or_build_shape<F>(&self, op: ShapeOperation, key: ShapeKey, builder: F) -> Arc<str>
    where
        F: FnOnce() -> String,
    {
        let slot = (op, key);
        if let Some(text) = self.shaped.get(&slot) {
            return Arc::clone(text.value());
        }
        let text = self.run_builder(builder);
        tracing::trace!(entity = E::TABLE, ?op, shape = %slot.1, sql = %text, "cached statement");
        self.shaped.insert(slot, Arc::clone(&text));
        text
    }

    fn run_builder<F: FnOnce() -> String>(&self, builder: F) -> Arc<str> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        Arc::from(builder())
    }

    // -------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------

    fn key(&self) -> &ColumnDescriptor<E> {
        self.columns.primary_key()
    }

    fn param(&self, field: &str) -> String {
        self.dialect.parameter(field)
    }

    fn key_param(&self, id: E::Id) -> Vec<(String, SqlValue)> {
        vec![(self.param(self.key().field), id.into())]
    }

    /// `k1 = @k1 AND k2 = @k2` over all key columns.
    fn key_predicate(&self) -> String {
        self.columns
            .keys()
            .map(|d| format!("{} = {}", d.quoted, self.param(d.field)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn is_audit(&self, d: &ColumnDescriptor<E>, name: &str) -> bool {
        d.column.eq_ignore_ascii_case(name)
    }

    /// Columns assigned the server clock on insert.
    fn stamped_on_insert(&self, d: &ColumnDescriptor<E>) -> bool {
        let audit = self.dialect.audit_columns();
        !d.key && (self.is_audit(d, audit.date_created) || self.is_audit(d, audit.last_modified))
    }

    /// Value expression for a column in an INSERT.
    fn insert_value(&self, d: &ColumnDescriptor<E>) -> String {
        if self.stamped_on_insert(d) {
            self.dialect.now().to_string()
        } else {
            self.param(d.field)
        }
    }

    /// Creation audit columns are never rewritten by an update.
    fn skipped_on_update(&self, d: &ColumnDescriptor<E>) -> bool {
        let audit = self.dialect.audit_columns();
        d.key || self.is_audit(d, audit.date_created) || self.is_audit(d, audit.created_by)
    }

    fn stamped_on_update(&self, d: &ColumnDescriptor<E>) -> bool {
        self.is_audit(d, self.dialect.audit_columns().last_modified)
    }

    /// SET assignment for a column in an UPDATE. `source` names the row
    /// alias for upserts; empty means bind the parameter.
    fn update_assignment(&self, d: &ColumnDescriptor<E>, source: &str) -> Option<String> {
        if self.skipped_on_update(d) {
            return None;
        }
        if self.stamped_on_update(d) {
            return Some(format!("{} = {}", d.quoted, self.dialect.now()));
        }
        let value = if source.is_empty() {
            self.param(d.field)
        } else {
            format!("{}.{}", source, d.quoted)
        };
        Some(format!("{} = {}", d.quoted, value))
    }

    fn assignments(&self, source: &str) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|d| self.update_assignment(d, source))
            .collect()
    }

    /// `INSERT INTO t (cols)` head plus the VALUES list.
    fn insert_parts(&self) -> (String, String) {
        let cols: Vec<&str> = self.columns.iter().map(|d| d.quoted.as_str()).collect();
        let vals: Vec<String> = self.columns.iter().map(|d| self.insert_value(d)).collect();
        (
            format!("INSERT INTO {} ({})", self.table, cols.join(", ")),
            format!("VALUES ({})", vals.join(", ")),
        )
    }

    fn insert_params(&self, record: &E) -> Vec<(String, SqlValue)> {
        self.columns
            .iter()
            .filter(|d| !self.stamped_on_insert(d))
            .map(|d| (self.param(d.field), d.value(record)))
            .collect()
    }

    fn update_params(&self, record: &E) -> Vec<(String, SqlValue)> {
        self.columns
            .iter()
            .filter(|d| d.key || !(self.skipped_on_update(d) || self.stamped_on_update(d)))
            .map(|d| (self.param(d.field), d.value(record)))
            .collect()
    }

    /// Validates a parameter set against the descriptor mapping, before any
    /// cache access.
    fn validate<I, S, V>(&self, params: I) -> Result<Vec<(String, SqlValue)>, CoreError>
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
        V: Into<SqlValue>,
    {
        let mut owned = Vec::new();
        for (name, value) in params {
            let name = name.as_ref();
            if !self.columns.contains(name) {
                return Err(CoreError::InvalidColumn {
                    entity: E::TABLE,
                    column: name.to_string(),
                });
            }
            // One placeholder per field, so a field may appear once.
            if owned.iter().any(|(seen, _)| seen == name) {
                return Err(CoreError::DuplicateParameter {
                    entity: E::TABLE,
                    column: name.to_string(),
                });
            }
            owned.push((name.to_string(), value.into()));
        }
        if owned.is_empty() {
            return Err(CoreError::EmptyFilter { entity: E::TABLE });
        }
        Ok(owned)
    }

    /// Builds the WHERE predicate for a shape. Every name was validated.
    fn shape_predicate(&self, key: &ShapeKey) -> String {
        let joiner = if key.match_all() { " AND " } else { " OR " };
        key.names()
            .filter_map(|name| self.columns.get(name).ok())
            .map(|d| format!("{} = {}", d.quoted, self.param(d.field)))
            .collect::<Vec<_>>()
            .join(joiner)
    }

    fn shaped_command<F>(
        &self,
        op: ShapeOperation,
        match_all: bool,
        params: Vec<(String, SqlValue)>,
        template: F,
    ) -> SqlCommand
    where
        F: FnOnce(&str) -> String,
    {
        let key = ShapeKey::new(match_all, params.iter().map(|(n, _)| n.as_str()));
        let text = self.get_or_build_shape(op, key.clone(), || template(&self.shape_predicate(&key)));
        let params = params
            .into_iter()
            .map(|(name, value)| (self.param(&name), value))
            .collect();
        SqlCommand::new(text, params)
    }

    // -------------------------------------------------------------------
    // Fixed-slot reads
    // -------------------------------------------------------------------

    /// `SELECT *` over the whole table.
    pub fn all(&self) -> SqlCommand {
        let text = self.get_or_build(Operation::All, || format!("SELECT * FROM {}", self.table));
        SqlCommand::new(text, Vec::new())
    }

    pub fn count(&self) -> SqlCommand {
        let text = self.get_or_build(Operation::Count, || {
            format!("SELECT COUNT(*) FROM {}", self.table)
        });
        SqlCommand::new(text, Vec::new())
    }

    /// Every primary key, ascending.
    pub fn sorted_ids(&self) -> SqlCommand {
        let text = self.get_or_build(Operation::SortedIds, || {
            let key = &self.key().quoted;
            format!("SELECT {} FROM {} ORDER BY {}", key, self.table, key)
        });
        SqlCommand::new(text, Vec::new())
    }

    pub fn first(&self) -> SqlCommand {
        let text = self.get_or_build(Operation::First, || {
            let tail = format!(" ORDER BY {}", self.key().quoted);
            self.dialect.select_limited("*", &self.table, &tail, "1")
        });
        SqlCommand::new(text, Vec::new())
    }

    pub fn last(&self) -> SqlCommand {
        let text = self.get_or_build(Operation::Last, || {
            let tail = format!(" ORDER BY {} DESC", self.key().quoted);
            self.dialect.select_limited("*", &self.table, &tail, "1")
        });
        SqlCommand::new(text, Vec::new())
    }

    /// At most one row by primary key.
    pub fn single(&self, id: E::Id) -> SqlCommand {
        let text = self.get_or_build(Operation::Single, || {
            let key = self.key();
            let tail = format!(" WHERE {} = {}", key.quoted, self.param(key.field));
            self.dialect.select_limited("*", &self.table, &tail, "1")
        });
        SqlCommand::new(text, self.key_param(id))
    }

    /// Rows by primary key.
    pub fn get(&self, id: E::Id) -> SqlCommand {
        let text = self.get_or_build(Operation::GetById, || {
            let key = self.key();
            format!(
                "SELECT * FROM {} WHERE {} = {}",
                self.table,
                key.quoted,
                self.param(key.field)
            )
        });
        SqlCommand::new(text, self.key_param(id))
    }

    pub fn delete(&self, id: E::Id) -> SqlCommand {
        let text = self.get_or_build(Operation::DeleteById, || {
            let key = self.key();
            format!(
                "DELETE FROM {} WHERE {} = {}",
                self.table,
                key.quoted,
                self.param(key.field)
            )
        });
        SqlCommand::new(text, self.key_param(id))
    }

    fn step(&self, op: Operation, id: E::Id) -> SqlCommand {
        let text = self.get_or_build(op, || {
            let key = self.key();
            let (cmp, order) = match op {
                Operation::Next | Operation::NextId => (">", ""),
                _ => ("<", " DESC"),
            };
            let projection = match op {
                Operation::NextId | Operation::PreviousId => key.quoted.as_str(),
                _ => "*",
            };
            let tail = format!(
                " WHERE {} {} {} ORDER BY {}{}",
                key.quoted,
                cmp,
                self.param(key.field),
                key.quoted,
                order
            );
            self.dialect.select_limited(projection, &self.table, &tail, "1")
        });
        SqlCommand::new(text, self.key_param(id))
    }

    /// The row following `id` in key order.
    pub fn next(&self, id: E::Id) -> SqlCommand {
        self.step(Operation::Next, id)
    }

    pub fn next_id(&self, id: E::Id) -> SqlCommand {
        self.step(Operation::NextId, id)
    }

    /// The row preceding `id` in key order.
    pub fn previous(&self, id: E::Id) -> SqlCommand {
        self.step(Operation::Previous, id)
    }

    pub fn previous_id(&self, id: E::Id) -> SqlCommand {
        self.step(Operation::PreviousId, id)
    }

    pub fn random(&self) -> SqlCommand {
        let text = self.get_or_build(Operation::Random, || {
            let tail = format!(" ORDER BY {}", self.dialect.random_order());
            self.dialect.select_limited("*", &self.table, &tail, "1")
        });
        SqlCommand::new(text, Vec::new())
    }

    /// `n` random rows; the count is a parameter so one text serves every `n`.
    pub fn random_n(&self, n: u32) -> SqlCommand {
        let text = self.get_or_build(Operation::RandomN, || {
            let tail = format!(" ORDER BY {}", self.dialect.random_order());
            self.dialect
                .select_limited("*", &self.table, &tail, &self.param("count"))
        });
        SqlCommand::new(text, vec![(self.param("count"), n.into())])
    }

    /// One random row owned by `user`. Requires the dialect's owner audit
    /// column on the entity.
    pub fn random_by_user(&self, user: impl Into<SqlValue>) -> Result<SqlCommand, CoreError> {
        let owner_column = self.dialect.audit_columns().owner;
        let owner = self
            .columns
            .by_column(owner_column)
            .ok_or_else(|| CoreError::MissingColumn {
                entity: E::TABLE,
                column: owner_column.to_string(),
            })?;
        let text = self.get_or_build(Operation::RandomByUser, || {
            let tail = format!(
                " WHERE {} = {} ORDER BY {}",
                owner.quoted,
                self.param(owner.field),
                self.dialect.random_order()
            );
            self.dialect.select_limited("*", &self.table, &tail, "1")
        });
        Ok(SqlCommand::new(
            text,
            vec![(self.param(owner.field), user.into())],
        ))
    }

    // -------------------------------------------------------------------
    // Fixed-slot writes
    // -------------------------------------------------------------------

    /// Inserts `record` and returns the generated key.
    pub fn insert(&self, record: &E) -> SqlCommand {
        let text = self.get_or_build(Operation::Insert, || {
            let (head, values) = self.insert_parts();
            let key = &self.key().quoted;
            match self.dialect {
                Dialect::Postgres | Dialect::Sqlite => {
                    format!("{} {} RETURNING {}", head, values, key)
                }
                Dialect::SqlServer => format!("{} OUTPUT INSERTED.{} {}", head, key, values),
            }
        });
        SqlCommand::new(text, self.insert_params(record))
    }

    /// Inserts `record` unless a row with the same key exists.
    pub fn try_insert(&self, record: &E) -> SqlCommand {
        let text = self.get_or_build(Operation::TryInsert, || {
            let (head, values) = self.insert_parts();
            match self.dialect {
                Dialect::Postgres => format!("{} {} ON CONFLICT DO NOTHING", head, values),
                Dialect::Sqlite => format!(
                    "INSERT OR IGNORE{} {}",
                    head.trim_start_matches("INSERT"),
                    values
                ),
                Dialect::SqlServer => format!(
                    "IF NOT EXISTS (SELECT 1 FROM {} WHERE {}) {} {}",
                    self.table,
                    self.key_predicate(),
                    head,
                    values
                ),
            }
        });
        SqlCommand::new(text, self.insert_params(record))
    }

    /// Inserts `record`, or updates the existing row with the same key.
    pub fn insert_or_update(&self, record: &E) -> SqlCommand {
        let text = self.get_or_build(Operation::InsertOrUpdate, || {
            let (head, values) = self.insert_parts();
            match self.dialect {
                Dialect::Postgres | Dialect::Sqlite => {
                    let keys: Vec<&str> = self.columns.keys().map(|d| d.quoted.as_str()).collect();
                    let sets = self.assignments("EXCLUDED");
                    if sets.is_empty() {
                        format!(
                            "{} {} ON CONFLICT ({}) DO NOTHING",
                            head,
                            values,
                            keys.join(", ")
                        )
                    } else {
                        format!(
                            "{} {} ON CONFLICT ({}) DO UPDATE SET {}",
                            head,
                            values,
                            keys.join(", "),
                            sets.join(", ")
                        )
                    }
                }
                Dialect::SqlServer => format!(
                    "IF EXISTS (SELECT 1 FROM {} WHERE {}) {} ELSE {} {}",
                    self.table,
                    self.key_predicate(),
                    self.update_text(),
                    head,
                    values
                ),
            }
        });
        let mut params = self.insert_params(record);
        if self.dialect == Dialect::SqlServer {
            for extra in self.update_params(record) {
                if !params.iter().any(|(name, _)| *name == extra.0) {
                    params.push(extra);
                }
            }
        }
        SqlCommand::new(text, params)
    }

    fn update_text(&self) -> String {
        let mut sets = self.assignments("");
        if sets.is_empty() {
            // nothing writable: keep the statement valid and side-effect free
            let key = self.key();
            sets.push(format!("{} = {}", key.quoted, key.quoted));
        }
        format!(
            "UPDATE {} SET {} WHERE {}",
            self.table,
            sets.join(", "),
            self.key_predicate()
        )
    }

    /// Writes every mutable column of `record`. The dialect's last-modified
    /// audit column is stamped by the server.
    pub fn update(&self, record: &E) -> SqlCommand {
        let text = self.get_or_build(Operation::Update, || self.update_text());
        SqlCommand::new(text, self.update_params(record))
    }

    // -------------------------------------------------------------------
    // Shape-keyed statements
    // -------------------------------------------------------------------

    /// `SELECT *` where every (or any) parameter matches.
    pub fn filter<I, S, V>(&self, match_all: bool, params: I) -> Result<SqlCommand, CoreError>
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
        V: Into<SqlValue>,
    {
        let params = self.validate(params)?;
        Ok(self.shaped_command(ShapeOperation::Where, match_all, params, |pred| {
            format!("SELECT * FROM {} WHERE {}", self.table, pred)
        }))
    }

    /// `SELECT *` where one column equals `value`.
    pub fn filter_column(&self, column: &str, value: impl Into<SqlValue>) -> Result<SqlCommand, CoreError> {
        self.filter(true, [(column, value.into())])
    }

    /// Primary keys of rows where one column equals `value`.
    pub fn filter_ids(&self, column: &str, value: impl Into<SqlValue>) -> Result<SqlCommand, CoreError> {
        let params = self.validate([(column, value.into())])?;
        Ok(self.shaped_command(ShapeOperation::WhereId, true, params, |pred| {
            format!("SELECT {} FROM {} WHERE {}", self.key().quoted, self.table, pred)
        }))
    }

    /// First row matching the parameters.
    pub fn find<I, S, V>(&self, match_all: bool, params: I) -> Result<SqlCommand, CoreError>
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
        V: Into<SqlValue>,
    {
        let params = self.validate(params)?;
        Ok(self.shaped_command(ShapeOperation::Find, match_all, params, |pred| {
            let tail = format!(" WHERE {}", pred);
            self.dialect.select_limited("*", &self.table, &tail, "1")
        }))
    }

    /// Single boolean-ish column: 1 when any row matches.
    pub fn exists<I, S, V>(&self, match_all: bool, params: I) -> Result<SqlCommand, CoreError>
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
        V: Into<SqlValue>,
    {
        let params = self.validate(params)?;
        Ok(self.shaped_command(ShapeOperation::Exists, match_all, params, |pred| {
            match self.dialect {
                Dialect::Postgres | Dialect::Sqlite => {
                    format!("SELECT EXISTS(SELECT 1 FROM {} WHERE {})", self.table, pred)
                }
                Dialect::SqlServer => format!(
                    "SELECT CASE WHEN EXISTS(SELECT 1 FROM {} WHERE {}) THEN 1 ELSE 0 END",
                    self.table, pred
                ),
            }
        }))
    }

    /// Deletes rows matching the parameters.
    pub fn delete_matching<I, S, V>(&self, match_all: bool, params: I) -> Result<SqlCommand, CoreError>
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
        V: Into<SqlValue>,
    {
        let params = self.validate(params)?;
        Ok(self.shaped_command(ShapeOperation::Delete, match_all, params, |pred| {
            format!("DELETE FROM {} WHERE {}", self.table, pred)
        }))
    }

    fn id_list(&self, op: ShapeOperation, ids: &[E::Id]) -> Result<SqlCommand, CoreError> {
        if ids.is_empty() {
            return Err(CoreError::EmptyIdList { entity: E::TABLE });
        }
        let key = self.key();
        let names: Vec<String> = (0..ids.len()).map(|i| format!("{}{}", key.field, i)).collect();
        let shape = ShapeKey::new(false, &names);
        let text = self.get_or_build_shape(op, shape, || {
            let placeholders: Vec<String> = names.iter().map(|n| self.param(n)).collect();
            let verb = match op {
                ShapeOperation::DeleteByIds => "DELETE",
                _ => "SELECT *",
            };
            format!(
                "{} FROM {} WHERE {} IN ({})",
                verb,
                self.table,
                key.quoted,
                placeholders.join(", ")
            )
        });
        let params = names
            .iter()
            .zip(ids)
            .map(|(name, id)| (self.param(name), id.clone().into()))
            .collect();
        Ok(SqlCommand::new(text, params))
    }

    /// Rows whose primary key is in `ids`. One cached text per list length.
    pub fn get_many(&self, ids: &[E::Id]) -> Result<SqlCommand, CoreError> {
        self.id_list(ShapeOperation::GetByIds, ids)
    }

    pub fn delete_many(&self, ids: &[E::Id]) -> Result<SqlCommand, CoreError> {
        self.id_list(ShapeOperation::DeleteByIds, ids)
    }
}
