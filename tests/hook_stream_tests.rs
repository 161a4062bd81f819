//! Hooks around bound methods, lazy streams, async calls, and the registry.

mod common;

use std::sync::Arc;

use daoplan::daoplan_exec::CallContext;
use daoplan::prelude::*;
use std::sync::Mutex;

#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn push(&self, line: String) {
        self.0.lock().expect("journal").push(line);
    }

    fn lines(&self) -> Vec<String> {
        self.0.lock().expect("journal").clone()
    }
}

struct Recorder {
    tag: &'static str,
    journal: Arc<Journal>,
}

impl Hook for Recorder {
    fn before(&self, call: &CallContext, _args: &[Arg]) -> Result<()> {
        self.journal.push(format!("{}:before:{}", self.tag, call.method.method));
        Ok(())
    }

    fn after(&self, outcome: std::result::Result<&Output, &Error>, call: &CallContext, _args: &[Arg]) -> Result<()> {
        let how = if outcome.is_ok() { "ok" } else { "err" };
        self.journal.push(format!("{}:after:{}:{how}", self.tag, call.method.method));
        Ok(())
    }
}

fn hooked_dao(ds: Arc<MemoryDataSource>, journal: &Arc<Journal>) -> Dao {
    let decl = InterfaceDecl::new("AccountDao")
        .entity(common::account_entity())
        .hook("audit", MethodFilter::of(&["find*"]))
        .method(
            MethodDecl::new("findNames", TypeShape::list(TypeShape::Str))
                .op(OpTag::select("SELECT first_name FROM account ORDER BY id"))
                .hook("timing"),
        )
        .method(
            MethodDecl::new("findBroken", TypeShape::list(TypeShape::Str))
                .op(OpTag::select("SELECT first_name FROM nowhere")),
        )
        .method(
            MethodDecl::new("streamAll", TypeShape::stream(TypeShape::entity("Account")))
                .op(OpTag::select("SELECT * FROM account ORDER BY id").fetch_size(2)),
        )
        .method(
            MethodDecl::new("countAll", TypeShape::i64()).op(OpTag::select("SELECT count(*) FROM account")),
        );
    Dao::builder(decl)
        .data_source(ds)
        .hook("audit", Arc::new(Recorder { tag: "audit", journal: journal.clone() }))
        .hook("timing", Arc::new(Recorder { tag: "timing", journal: journal.clone() }))
        .bind()
        .expect("bind")
}

#[test]
fn hooks_wrap_matching_methods_in_order() {
    let journal = Arc::new(Journal::default());
    let dao = hooked_dao(common::account_db("hooks-order"), &journal);

    common::call_value(&dao, "findNames", &[]);
    assert!(dao.call("findBroken", &[]).is_err());
    common::call_value(&dao, "countAll", &[]);

    assert_eq!(
        journal.lines(),
        [
            "audit:before:findNames",
            "timing:before:findNames",
            "timing:after:findNames:ok",
            "audit:after:findNames:ok",
            "audit:before:findBroken",
            "audit:after:findBroken:err",
        ]
    );
}

#[test]
fn unregistered_hooks_fail_the_bind() {
    let decl = InterfaceDecl::new("AccountDao").method(
        MethodDecl::new("countAll", TypeShape::i64())
            .op(OpTag::select("SELECT count(*) FROM account"))
            .hook("missing"),
    );
    let err = Dao::builder(decl)
        .data_source(common::account_db("hooks-missing"))
        .bind()
        .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn streams_open_on_first_pull_and_release_when_dropped() {
    let ds = common::account_db("stream-lazy");
    let journal = Arc::new(Journal::default());
    let dao = hooked_dao(ds.clone(), &journal);

    let mut rows = dao
        .call("streamAll", &[])
        .expect("stream")
        .into_stream()
        .expect("stream output");
    assert_eq!(ds.counters().prepared, 0, "nothing runs before the first pull");

    let first = rows.next().expect("row").expect("ok");
    assert_eq!(first.member("firstName"), Some(Value::from("ada")));
    assert_eq!(ds.counters().open_statements, 1);

    drop(rows);
    assert_eq!(ds.counters().open_statements, 0);
    assert_eq!(ds.counters().open_connections, 0);

    let all: Vec<Value> = dao
        .call("streamAll", &[])
        .expect("stream")
        .into_stream()
        .expect("stream output")
        .collect::<Result<_>>()
        .expect("rows");
    assert_eq!(all.len(), 3);
    assert_eq!(ds.counters().open_statements, 0);
}

#[test]
fn async_calls_run_on_the_executor() {
    let journal = Arc::new(Journal::default());
    let dao = Arc::new(hooked_dao(common::account_db("async-calls"), &journal));

    let handles: Vec<_> = (0..4)
        .map(|_| dao.call_async("countAll", Vec::new()).expect("spawn"))
        .collect();
    for h in handles {
        assert_eq!(h.join().expect("join").into_value().expect("value"), Value::Int(3));
    }
    assert!(matches!(dao.call_async("nope", Vec::new()), Err(Error::Invariant(_))));
}

#[test]
fn registry_hands_out_one_table_per_identity() {
    let registry = DaoRegistry::new();
    let ds = common::account_db("registry-identity");
    let builder = || {
        Dao::builder(
            InterfaceDecl::new("AccountDao")
                .method(MethodDecl::new("countAll", TypeShape::i64()).op(OpTag::select("SELECT count(*) FROM account"))),
        )
        .data_source(ds.clone())
    };
    let a = registry.get_or_bind(builder()).expect("bind");
    let b = registry.get_or_bind(builder()).expect("bind");
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 1);
    assert_eq!(common::call_value(&b, "countAll", &[]), Value::Int(3));
}

#[test]
fn accessor_interfaces_with_one_name_get_their_own_tables() {
    let registry = DaoRegistry::new();
    let ds = common::account_db("registry-accessors");
    let bind = |method: &str| {
        let decl = InterfaceDecl::new("X").method(
            MethodDecl::new(method, TypeShape::Str).non_db(NonDb::accessor(|_| Ok(Value::from("hi")))),
        );
        registry
            .get_or_bind(Dao::builder(decl).data_source(ds.clone()))
            .expect("bind")
    };
    let a = bind("one");
    let b = bind("two");
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(a.has_method("one"));
    assert!(b.has_method("two"));
    assert_eq!(common::call_value(&b, "two", &[]), Value::from("hi"));
}
