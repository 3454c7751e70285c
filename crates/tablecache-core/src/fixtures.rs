//! Test entities shared by the unit tests in this crate.

use serde::{Deserialize, Serialize};

use crate::entity::{ColumnDef, Entity};

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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyless {
    pub a: i64,
}

impl Entity for Keyless {
    const TABLE: &'static str = "keyless";
    type Id = i64;

    fn id(&self) -> i64 {
        self.a
    }

    fn columns() -> &'static [ColumnDef<Self>] {
        const COLUMNS: &[ColumnDef<Keyless>] = &[ColumnDef::new("a", "a", |k: &Keyless| k.a.into())];
        COLUMNS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Twice {
    pub a: i64,
}

impl Entity for Twice {
    const TABLE: &'static str = "twice";
    type Id = i64;

    fn id(&self) -> i64 {
        self.a
    }

    fn columns() -> &'static [ColumnDef<Self>] {
        const COLUMNS: &[ColumnDef<Twice>] = &[
            ColumnDef::key("a", "a", |t: &Twice| t.a.into()),
            ColumnDef::new("a", "a2", |t: &Twice| t.a.into()),
        ];
        COLUMNS
    }
}
