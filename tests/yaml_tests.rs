//! YAML interfaces bound against CSV-seeded memory tables, and the typed
//! facade over them.

use std::sync::Arc;

use daoplan::daoplan_exec::Json;
use daoplan::prelude::*;
use serde::Deserialize;

const ACCOUNT_DAO: &str = r#"
interface: AccountDao
entity:
  name: Account
  id: [id]
  properties:
    - { name: id, type: i64 }
    - { name: firstName, type: String }
    - { name: parentId, type: i64 }
crud: i64
refresh_cache: ["rename"]
methods:
  - name: findByFirstName
    returns: Vec<Account>
    params: [ { type: String, bind: firstName } ]
    select: "SELECT * FROM account WHERE first_name = :firstName ORDER BY id"
    named: true
    cache: {}
  - name: rename
    returns: bool
    params: [ { type: String }, { type: i64 } ]
    sql_id: account.rename
    verb: update
  - name: childCount
    returns: i64
    params: [ { type: i64 } ]
    sql_id: account.children
    verb: select
  - name: version
    returns: i32
    constant: 3
sql:
  account.rename: { sql: "UPDATE account SET first_name = ? WHERE id = ?" }
"#;

const MAPPER: &str = r#"
account.children: { sql: "SELECT count(*) FROM account WHERE parent_id = ?" }
"#;

const SEED: &str = "id,first_name,parent_id\n1,ada,0\n2,bob,1\n3,cy,1\n4,bob,3\n";

fn seeded(id: &str) -> Arc<MemoryDataSource> {
    let ds = MemoryDataSource::new(id);
    assert_eq!(load_csv(&ds, "account", SEED.as_bytes()).expect("seed"), 4);
    Arc::new(ds)
}

fn bind(ds: Arc<MemoryDataSource>) -> Dao {
    let file = parse_dao_yaml(ACCOUNT_DAO).expect("interface yaml");
    let mut sql = file.sql;
    let extra = parse_mapper_yaml(MAPPER).expect("mapper yaml");
    for id in extra.ids() {
        if let Some(entry) = extra.get(id) {
            sql.insert(id, entry);
        }
    }
    Dao::builder(file.interface)
        .data_source(ds)
        .mapper(Arc::new(sql))
        .bind()
        .expect("bind")
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Account {
    id: i64,
    first_name: String,
    parent_id: i64,
}

daoplan::dao_struct! {
    /// Typed view over the YAML-declared interface.
    pub struct AccountStore {
        fn findByFirstName(name: &str) -> Vec<Json<Account>>;
        fn childCount(parent: i64) -> i64;
        fn rename(name: &str, id: i64) -> bool;
        fn count() -> i64;
        fn version() -> i32;
    }
}

#[test]
fn yaml_methods_run_against_csv_rows() {
    let ds = seeded("yaml-basic");
    let dao = bind(ds.clone());

    let bobs = dao.call("findByFirstName", &[Arg::from("bob")]).expect("call");
    let ids: Vec<i64> = Vec::<Record>::from_output(bobs)
        .expect("records")
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect();
    assert_eq!(ids, vec![2, 4]);

    let count = dao.call("childCount", &[Arg::from(1i64)]).expect("call");
    assert_eq!(count.into_value().expect("value"), Value::Int(2));
    assert_eq!(dao.call("version", &[]).expect("call").into_value().expect("value"), Value::Int(3));
    assert_eq!(ds.counters().open_connections, 0);
}

#[test]
fn typed_facade_converts_outputs() {
    let store = AccountStore::new(Arc::new(bind(seeded("yaml-typed"))));

    let bobs = store.findByFirstName("bob").expect("find");
    assert_eq!(
        bobs.into_iter().map(|Json(a)| a).collect::<Vec<_>>(),
        vec![
            Account { id: 2, first_name: "bob".into(), parent_id: 1 },
            Account { id: 4, first_name: "bob".into(), parent_id: 3 },
        ]
    );
    assert_eq!(store.childCount(1).expect("children"), 2);
    assert_eq!(store.count().expect("count"), 4);
    assert_eq!(store.version().expect("version"), 3);
}

#[test]
fn renames_refresh_the_cached_lookup() {
    let ds = seeded("yaml-refresh");
    let store = AccountStore::new(Arc::new(bind(ds.clone())));

    assert_eq!(store.findByFirstName("cy").expect("find").len(), 1);
    let before = ds.counters().executions;
    assert_eq!(store.findByFirstName("cy").expect("find").len(), 1);
    assert_eq!(ds.counters().executions, before, "served from the cache");

    assert!(store.rename("bob", 3).expect("rename"));
    assert!(store.findByFirstName("cy").expect("find").is_empty());
    assert_eq!(store.findByFirstName("bob").expect("find").len(), 3);
}

#[test]
fn missing_mapper_entries_fail_the_bind() {
    let file = parse_dao_yaml(ACCOUNT_DAO).expect("interface yaml");
    let err = Dao::builder(file.interface)
        .data_source(seeded("yaml-missing"))
        .mapper(Arc::new(file.sql))
        .bind()
        .unwrap_err();
    assert!(err.is_config(), "{err}");
}
