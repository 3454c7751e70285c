//! Test entity shared by the unit tests in this crate.

use serde::{Deserialize, Serialize};

use tablecache_core::{ColumnDef, Entity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub qty: i64,
}

impl Item {
    pub fn new(id: i64, name: &str, qty: i64) -> Self {
        Item {
            id,
            name: name.to_string(),
            qty,
        }
    }
}

impl Entity for Item {
    const TABLE: &'static str = "items";
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }

    fn columns() -> &'static [ColumnDef<Self>] {
        const COLUMNS: &[ColumnDef<Item>] = &[
            ColumnDef::key("id", "id", |i: &Item| i.id.into()),
            ColumnDef::new("name", "name", |i: &Item| i.name.clone().into()),
            ColumnDef::new("qty", "qty", |i: &Item| i.qty.into()),
        ];
        COLUMNS
    }
}
