use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use daoplan::prelude::*;

fn account_interface() -> InterfaceDecl {
    InterfaceDecl::new("AccountDao")
        .entity(
            EntityDescriptor::new("Account")
                .property(PropertyDecl::new("id", TypeShape::i64()))
                .property(PropertyDecl::new("firstName", TypeShape::Str))
                .property(PropertyDecl::new("parentId", TypeShape::i64()))
                .id_property("id"),
        )
        .crud(TypeShape::i64())
        .method(
            MethodDecl::new("findByParent", TypeShape::list(TypeShape::entity("Account")))
                .arg(TypeShape::i64())
                .op(OpTag::select("SELECT * FROM account WHERE parent_id = ? ORDER BY id")),
        )
        .method(
            MethodDecl::new("findCachedByParent", TypeShape::list(TypeShape::entity("Account")))
                .arg(TypeShape::i64())
                .op(OpTag::select("SELECT * FROM account WHERE parent_id = ? ORDER BY id"))
                .cached(CacheResult::default()),
        )
}

fn make_db(rows: i64) -> Arc<MemoryDataSource> {
    let ds = MemoryDataSource::new("bench")
        .with_table(
            TableDef::new("account")
                .auto_increment("id")
                .columns(&["first_name", "parent_id"]),
        )
        .unwrap();
    for i in 0..rows {
        ds.insert_row(
            "account",
            vec![("first_name", format!("user-{i}").into()), ("parent_id", (i % 16).into())],
        )
        .unwrap();
    }
    Arc::new(ds)
}

fn bench_compile(c: &mut Criterion) {
    let decl = account_interface();
    let cfg = DaoConfig::default();
    c.bench_function("compile_interface", |b| {
        b.iter(|| {
            let _ = compile_interface(&decl, None, &cfg).unwrap();
        })
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let dao = Dao::builder(account_interface())
        .data_source(make_db(1024))
        .bind()
        .unwrap();
    let parent = [Arg::from(3i64)];
    c.bench_function("dispatch_select", |b| {
        b.iter(|| {
            let _ = dao.call("findByParent", &parent).unwrap();
        })
    });
    c.bench_function("dispatch_cached_select", |b| {
        b.iter(|| {
            let _ = dao.call("findCachedByParent", &parent).unwrap();
        })
    });
    c.bench_function("dispatch_crud_get", |b| {
        b.iter(|| {
            let _ = dao.call("get", &[Arg::from(512i64)]).unwrap();
        })
    });
}

criterion_group!(planning, bench_compile, bench_dispatch);
criterion_main!(planning);
