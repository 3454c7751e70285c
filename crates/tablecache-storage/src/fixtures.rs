//! Test entity shared by the unit tests in this crate.

use serde::{Deserialize, Serialize};

use tablecache_core::{ColumnDef, Entity};

pub const PEOPLE_SCHEMA: &str = "CREATE TABLE people (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    age INTEGER NOT NULL,
    owner_id INTEGER,
    last_modified TEXT
);";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub owner_id: Option<i64>,
    pub last_modified: Option<String>,
}

impl Person {
    pub fn new(id: i64, name: &str, age: i64) -> Self {
        Person {
            id,
            name: name.to_string(),
            age,
            owner_id: None,
            last_modified: None,
        }
    }
}

impl Entity for Person {
    const TABLE: &'static str = "people";
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }

    fn columns() -> &'static [ColumnDef<Self>] {
        const COLUMNS: &[ColumnDef<Person>] = &[
            ColumnDef::key("id", "id", |p: &Person| p.id.into()),
            ColumnDef::new("name", "name", |p: &Person| p.name.clone().into()),
            ColumnDef::new("age", "age", |p: &Person| p.age.into()),
            ColumnDef::new("owner_id", "owner_id", |p: &Person| p.owner_id.into()),
            ColumnDef::new("last_modified", "last_modified", |p: &Person| {
                p.last_modified.clone().into()
            }),
        ];
        COLUMNS
    }
}
