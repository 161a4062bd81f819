//! Result caching and invalidation through a bound interface.

mod common;

use std::sync::Arc;

use daoplan::prelude::*;

fn cached_dao(ds: Arc<MemoryDataSource>, cache: CacheResult) -> Dao {
    let decl = InterfaceDecl::new("AccountDao")
        .entity(common::account_entity())
        .method(
            MethodDecl::new("findByParent", TypeShape::list(TypeShape::entity("Account")))
                .arg(TypeShape::i64())
                .op(OpTag::select("SELECT * FROM account WHERE parent_id = ? ORDER BY id"))
                .cached(cache),
        )
        .method(
            MethodDecl::new("rename", TypeShape::Bool)
                .arg(TypeShape::Str)
                .arg(TypeShape::i64())
                .op(OpTag::update("UPDATE account SET first_name = ? WHERE id = ?")),
        )
        .refresh_cache(MethodFilter::of(&["rename"]));
    Dao::builder(decl).data_source(ds).bind().expect("bind")
}

fn executions(ds: &MemoryDataSource) -> u64 {
    ds.counters().executions
}

fn len(v: &Value) -> usize {
    v.as_list().map_or(0, <[Value]>::len)
}

#[test]
fn size_bounds_decide_what_is_stored() {
    let ds = common::account_db("cache-bounds");
    for i in 0..5 {
        ds.insert_row("account", vec![("first_name", format!("kid{i}").into()), ("parent_id", 9i64.into())])
            .expect("seed");
    }
    let dao = cached_dao(ds.clone(), CacheResult::sized(1, 5));
    let by = |parent: i64| common::call_value(&dao, "findByParent", &[Arg::from(parent)]);

    let start = executions(&ds);
    assert_eq!(len(&by(42)), 0);
    assert_eq!(len(&by(42)), 0);
    assert_eq!(executions(&ds) - start, 2, "an empty result is never stored");

    let start = executions(&ds);
    assert_eq!(len(&by(9)), 5);
    assert_eq!(len(&by(9)), 5);
    assert_eq!(executions(&ds) - start, 1, "five rows fit 1..=5 and are served from the cache");

    let start = executions(&ds);
    by(1);
    by(1);
    assert_eq!(executions(&ds) - start, 1);
}

#[test]
fn oversized_results_bypass_the_cache() {
    let ds = common::account_db("cache-oversized");
    let dao = cached_dao(ds.clone(), CacheResult::sized(0, 1));
    let start = executions(&ds);
    common::call_value(&dao, "findByParent", &[Arg::from(1i64)]);
    common::call_value(&dao, "findByParent", &[Arg::from(1i64)]);
    assert_eq!(executions(&ds) - start, 2);
}

#[test]
fn writes_named_by_the_filter_clear_the_cache() {
    let ds = common::account_db("cache-refresh");
    let dao = cached_dao(ds.clone(), CacheResult::default());
    let first_name = |v: &Value| v.as_list().and_then(|l| l.first()).and_then(|e| e.member("firstName"));

    let before = common::call_value(&dao, "findByParent", &[Arg::from(1i64)]);
    assert_eq!(first_name(&before), Some(Value::from("bob")));
    assert!(dao.cache_store().is_some_and(|s| s.len() == 1));

    assert_eq!(
        common::call_value(&dao, "rename", &[Arg::from("bobby"), Arg::from(2i64)]),
        Value::Bool(true)
    );
    assert!(dao.cache_store().is_some_and(|s| s.is_empty()));

    let after = common::call_value(&dao, "findByParent", &[Arg::from(1i64)]);
    assert_eq!(first_name(&after), Some(Value::from("bobby")));
}

#[test]
fn copy_transfer_hands_out_private_snapshots() {
    let ds = common::account_db("cache-copy");
    let copy = CacheResult {
        transfer: Transfer::Copy,
        ..CacheResult::default()
    };
    let dao = cached_dao(ds, copy);

    let got = common::call_value(&dao, "findByParent", &[Arg::from(1i64)]);
    if let Some(Value::Entity(e)) = got.as_list().and_then(|l| l.first()) {
        e.set("firstName", Value::from("mutated"));
    } else {
        panic!("expected entities, got {got:?}");
    }

    let again = common::call_value(&dao, "findByParent", &[Arg::from(1i64)]);
    let name = again.as_list().and_then(|l| l.first()).and_then(|e| e.member("firstName"));
    assert_eq!(name, Some(Value::from("bob")));
}

#[test]
fn invalidation_without_a_cached_method_is_a_config_error() {
    let decl = InterfaceDecl::new("AccountDao").method(
        MethodDecl::new("rename", TypeShape::Bool)
            .arg(TypeShape::Str)
            .arg(TypeShape::i64())
            .op(OpTag::update("UPDATE account SET first_name = ? WHERE id = ?"))
            .refresh_cache(),
    );
    let err = Dao::builder(decl)
        .data_source(common::account_db("cache-misconfigured"))
        .bind()
        .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn writes_cannot_cache() {
    let decl = InterfaceDecl::new("AccountDao").method(
        MethodDecl::new("rename", TypeShape::Bool)
            .arg(TypeShape::Str)
            .arg(TypeShape::i64())
            .op(OpTag::update("UPDATE account SET first_name = ? WHERE id = ?"))
            .cached(CacheResult::default()),
    );
    let err = Dao::builder(decl)
        .data_source(common::account_db("cache-write"))
        .bind()
        .unwrap_err();
    assert!(err.is_config());
}
