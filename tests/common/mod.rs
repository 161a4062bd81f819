//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use daoplan::prelude::*;

pub fn account_entity() -> EntityDescriptor {
    EntityDescriptor::new("Account")
        .property(PropertyDecl::new("id", TypeShape::i64()))
        .property(PropertyDecl::new("firstName", TypeShape::Str))
        .property(PropertyDecl::new("parentId", TypeShape::i64()))
        .id_property("id")
}

/// `account(id auto, first_name, parent_id)` seeded with ada/bob/cy.
pub fn account_db(id: &str) -> Arc<MemoryDataSource> {
    let ds = MemoryDataSource::new(id)
        .with_table(
            TableDef::new("account")
                .auto_increment("id")
                .columns(&["first_name", "parent_id"]),
        )
        .expect("create account table");
    for (name, parent) in [("ada", 0i64), ("bob", 1), ("cy", 1)] {
        ds.insert_row(
            "account",
            vec![("first_name", name.into()), ("parent_id", parent.into())],
        )
        .expect("seed account");
    }
    Arc::new(ds)
}

pub fn account(name: &str, parent: i64) -> Record {
    Record::new("Account")
        .with("firstName", name)
        .with("parentId", parent)
}

pub fn accounts(n: usize) -> Vec<Record> {
    (0..n).map(|i| account(&format!("user{i}"), 9)).collect()
}

pub fn call_value(dao: &Dao, method: &str, args: &[Arg]) -> Value {
    dao.call(method, args)
        .unwrap_or_else(|e| panic!("{method} failed: {e}"))
        .into_value()
        .expect("value output")
}
