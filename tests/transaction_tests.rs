//! Propagation modes around an ambient transaction.

mod common;

use std::sync::Arc;

use daoplan::daoplan_exec::{tx, TxStatus};
use daoplan::prelude::*;

fn tx_dao(ds: Arc<MemoryDataSource>) -> Dao {
    let names = || TypeShape::list(TypeShape::Str);
    let decl = InterfaceDecl::new("AccountDao")
        .method(
            MethodDecl::new("add", TypeShape::Unit)
                .arg(TypeShape::Str)
                .op(OpTag::insert("INSERT INTO account (first_name) VALUES (?)")),
        )
        .method(
            MethodDecl::new("addRequired", TypeShape::Unit)
                .arg(TypeShape::Str)
                .op(OpTag::insert("INSERT INTO account (first_name, parent_id) VALUES (?, 3)"))
                .transactional(Propagation::Required),
        )
        .method(
            MethodDecl::new("addInNew", TypeShape::Unit)
                .arg(names())
                .op(OpTag::insert("INSERT INTO account (first_name, parent_id) VALUES (?, 7)").batch(1))
                .transactional(Propagation::RequiresNew),
        )
        .method(
            MethodDecl::new("addOutside", TypeShape::Unit)
                .arg(TypeShape::Str)
                .op(OpTag::insert("INSERT INTO account (first_name, parent_id) VALUES (?, 8)"))
                .transactional(Propagation::NotSupported),
        );
    Dao::builder(decl).data_source(ds).bind().expect("bind")
}

#[test]
fn requires_new_rolls_back_alone() {
    let ds = common::account_db("tx-requires-new");
    let dao = tx_dao(ds.clone());

    let outer = dao.begin_transaction().expect("begin");
    dao.call("add", &[Arg::from("A")]).expect("insert A");
    assert_eq!(ds.row_count("account"), 4);

    ds.fail_nth_execution(2, ", 7)");
    let err = dao
        .call("addInNew", &[Arg::from(vec!["B1", "B2"])])
        .unwrap_err();
    assert!(matches!(err, Error::Statement(_)), "{err}");

    assert_eq!(ds.row_count("account"), 4, "B1 rolled back, A untouched");
    assert_eq!(outer.status(), TxStatus::Active);
    assert!(tx::in_transaction(ds.as_ref().id()));

    outer.rollback().expect("rollback");
    assert_eq!(ds.row_count("account"), 3, "neither A nor B persists");
    assert!(!tx::in_transaction(ds.as_ref().id()));
    assert_eq!(ds.counters().open_connections, 0);
}

#[test]
fn requires_new_commits_independently() {
    let ds = common::account_db("tx-requires-new-commit");
    let dao = tx_dao(ds.clone());

    let outer = dao.begin_transaction().expect("begin");
    dao.call("add", &[Arg::from("A")]).expect("insert A");
    dao.call("addInNew", &[Arg::from(vec!["B1", "B2"])]).expect("insert B");
    outer.rollback().expect("rollback");

    let names: Vec<Value> = ds
        .rows("account")
        .expect("rows")
        .iter()
        .filter_map(|r| r.get_by_name("first_name").cloned())
        .collect();
    assert_eq!(names, vec![Value::from("ada"), "bob".into(), "cy".into(), "B1".into(), "B2".into()]);
}

#[test]
fn a_failing_participant_dooms_the_ambient_transaction() {
    let ds = common::account_db("tx-required");
    let dao = tx_dao(ds.clone());

    let outer = dao.begin_transaction().expect("begin");
    dao.call("add", &[Arg::from("A")]).expect("insert A");
    ds.fail_nth_execution(1, ", 3)");
    assert!(dao.call("addRequired", &[Arg::from("C")]).is_err());
    assert_eq!(outer.status(), TxStatus::RollbackOnly);

    let err = outer.commit().unwrap_err();
    assert!(matches!(err, Error::Transaction(_)), "{err}");
    assert_eq!(ds.row_count("account"), 3);
}

#[test]
fn required_without_ambient_commits_its_own_transaction() {
    let ds = common::account_db("tx-required-own");
    let dao = tx_dao(ds.clone());
    dao.call("addRequired", &[Arg::from("C")]).expect("insert");
    assert_eq!(ds.row_count("account"), 4);
    assert_eq!(ds.counters().commits, 1);
    assert!(!tx::in_transaction(ds.as_ref().id()));
}

#[test]
fn not_supported_escapes_the_ambient_transaction() {
    let ds = common::account_db("tx-not-supported");
    let dao = tx_dao(ds.clone());

    let outer = dao.begin_transaction().expect("begin");
    dao.call("addOutside", &[Arg::from("D")]).expect("insert D");
    assert!(tx::in_transaction(ds.as_ref().id()), "ambient restored afterwards");
    outer.rollback().expect("rollback");
    assert_eq!(ds.row_count("account"), 4, "D was auto-committed");
}
