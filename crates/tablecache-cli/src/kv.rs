//! The key/value entity the CLI operates on.

use serde::{Deserialize, Serialize};

use tablecache_core::{ColumnDef, Entity};

/// Migration creating the `kv` table.
pub const KV_SCHEMA: &str = r#"CREATE TABLE kv (
    "key" TEXT PRIMARY KEY NOT NULL,
    "value" TEXT NOT NULL,
    owner_id INTEGER,
    date_created TEXT,
    last_modified TEXT
);"#;

/// One row of the `kv` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvRecord {
    pub key: String,
    pub value: String,
    pub owner_id: Option<i64>,
    pub date_created: Option<String>,
    pub last_modified: Option<String>,
}

impl KvRecord {
    pub fn new(key: &str, value: &str) -> Self {
        KvRecord {
            key: key.to_string(),
            value: value.to_string(),
            owner_id: None,
            date_created: None,
            last_modified: None,
        }
    }
}

impl Entity for KvRecord {
    const TABLE: &'static str = "kv";
    type Id = String;

    fn id(&self) -> String {
        self.key.clone()
    }

    fn columns() -> &'static [ColumnDef<Self>] {
        const COLUMNS: &[ColumnDef<KvRecord>] = &[
            ColumnDef::key("key", "key", |r: &KvRecord| r.key.clone().into()),
            ColumnDef::new("value", "value", |r: &KvRecord| r.value.clone().into()),
            ColumnDef::new("owner_id", "owner_id", |r: &KvRecord| r.owner_id.into()),
            ColumnDef::new("date_created", "date_created", |r: &KvRecord| {
                r.date_created.clone().into()
            }),
            ColumnDef::new("last_modified", "last_modified", |r: &KvRecord| {
                r.last_modified.clone().into()
            }),
        ];
        COLUMNS
    }
}
