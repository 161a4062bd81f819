//! List/exists classification of select methods, checked on literal method
//! shapes and end to end against the memory backend.

mod common;

use daoplan::daoplan_planner::classify;
use daoplan::prelude::*;

fn select(name: &str, returns: TypeShape) -> MethodDecl {
    MethodDecl::new(name, returns).op(OpTag::select("SELECT first_name FROM account"))
}

fn is_list(m: &MethodDecl) -> bool {
    classify(m, OperationKind::Default)
        .expect("classify")
        .is_list_query
}

#[test]
fn collections_are_lists_unless_named_for_one_row() {
    let names = TypeShape::list(TypeShape::Str);
    assert!(is_list(&select("findNames", names.clone())));
    assert!(is_list(&select("names", TypeShape::set(TypeShape::Str))));

    for single in ["getNames", "findFirstNames", "findOneRow", "find_first_names", "find_one_row"] {
        assert!(!is_list(&select(single, names.clone())), "{single}");
    }
    assert!(!is_list(&select("findName", TypeShape::Str)));
}

#[test]
fn a_trailing_result_extractor_is_never_a_list() {
    let m = select("findNames", TypeShape::list(TypeShape::Str))
        .arg(TypeShape::result_extractor(TypeShape::list(TypeShape::Str)));
    assert!(!is_list(&m));
}

#[test]
fn row_mapper_output_decides_between_list_and_single_row() {
    let returns = TypeShape::list(TypeShape::Str);
    let element_mapper = select("getNames", returns.clone()).arg(TypeShape::row_mapper(TypeShape::Str));
    assert!(is_list(&element_mapper), "mapper output fits the element: list");

    let whole_mapper = select("findNames", returns.clone()).arg(TypeShape::row_mapper(returns.clone()));
    assert!(!is_list(&whole_mapper), "mapper output is the whole return: one row");
}

/// Neither the element nor the whole return type matches the mapper output,
/// yet the method still classifies as a list. Kept as observed.
#[test]
fn edge_case_unrelated_row_mapper_output_still_means_list() {
    let m = select("getNames", TypeShape::list(TypeShape::Str)).arg(TypeShape::row_mapper(TypeShape::i64()));
    assert!(is_list(&m));
}

#[test]
fn explicit_kinds_are_validated_against_the_shape() {
    let m = select("one", TypeShape::Str);
    assert!(classify(&m, OperationKind::List).unwrap_err().is_config());

    let m = select("hasAny", TypeShape::i64());
    assert!(classify(&m, OperationKind::Exists).unwrap_err().is_config());

    let m = select("hasAny", TypeShape::Bool);
    assert!(classify(&m, OperationKind::Default).expect("classify").is_exists_query);
    let m = select("hash", TypeShape::Bool);
    assert!(!classify(&m, OperationKind::Default).expect("classify").is_exists_query);
}

#[test]
fn classification_drives_the_runtime_result() {
    let decl = InterfaceDecl::new("NameDao")
        .method(
            MethodDecl::new("findNames", TypeShape::list(TypeShape::Str))
                .op(OpTag::select("SELECT first_name FROM account ORDER BY first_name")),
        )
        .method(
            MethodDecl::new("getPair", TypeShape::list(TypeShape::Any))
                .arg(TypeShape::i64())
                .op(OpTag::select("SELECT first_name, parent_id FROM account WHERE id = ?")),
        )
        .method(
            MethodDecl::new("upperNames", TypeShape::list(TypeShape::Str))
                .arg(TypeShape::row_mapper(TypeShape::Str))
                .op(OpTag::select("SELECT first_name FROM account ORDER BY first_name")),
        )
        .method(
            MethodDecl::new("existsByName", TypeShape::Bool)
                .arg(TypeShape::Str)
                .op(OpTag::select("SELECT 1 FROM account WHERE first_name = ?")),
        );
    let dao = Dao::builder(decl)
        .data_source(common::account_db("classify-e2e"))
        .bind()
        .expect("bind");

    assert_eq!(
        common::call_value(&dao, "findNames", &[]),
        Value::from(vec!["ada", "bob", "cy"])
    );
    assert_eq!(
        common::call_value(&dao, "getPair", &[Arg::from(2i64)]),
        Value::List(vec![Value::from("bob"), Value::Int(1)])
    );

    let upper = Arg::mapper(|row| {
        let name = row.get(0).and_then(Value::as_str).unwrap_or_default();
        Ok(Value::from(name.to_uppercase()))
    });
    assert_eq!(
        common::call_value(&dao, "upperNames", &[upper]),
        Value::from(vec!["ADA", "BOB", "CY"])
    );

    assert_eq!(common::call_value(&dao, "existsByName", &[Arg::from("cy")]), Value::Bool(true));
    assert_eq!(common::call_value(&dao, "existsByName", &[Arg::from("zed")]), Value::Bool(false));
}
