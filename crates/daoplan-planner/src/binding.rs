//! Method arguments -> statement parameters.
//!
//! `build_binding` runs once at bind time and picks one of a handful of
//! binding shapes. At call time the chosen shape is replayed against any
//! `ParamTarget` (the exec crate's prepared query).

use std::fmt;

use daoplan_core::call::{Arg, ResultExtractorFn, RowFilterFn, RowMapperFn};
use daoplan_core::decl::{EntityDescriptor, MethodDecl, OperationKind, QueryDescriptor, Verb};
use daoplan_core::error::{Error, Result};
use daoplan_core::shape::TypeShape;
use daoplan_core::sql::{has_define, substitute_define};
use daoplan_core::value::Value;

/// Parameter sink: positional and named setters of a prepared query.
pub trait ParamTarget {
    /// Zero-based positional setter.
    fn set(&mut self, index: usize, value: Value) -> Result<()>;

    /// Sets every position bound to `name`; unknown names are an error.
    fn set_named(&mut self, name: &str, value: Value) -> Result<()>;
}

/// Positions of the trailing callback arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackSlots {
    pub row_mapper: Option<usize>,
    pub extractor: Option<usize>,
    pub filter: Option<usize>,
}

/// How each element of a bulk argument is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemBinding {
    /// Element bound to the single placeholder.
    Single,
    /// Element is itself a list spread over the placeholders.
    Spread,
    /// Element is an entity, map, or composite id bound member-by-member.
    Structured,
    /// Element bound under one name in a named query.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingShape {
    None,
    PositionalSingle { arg: usize },
    PositionalArray { args: Vec<usize> },
    /// One collection/array argument spread over the placeholders.
    Spread { arg: usize },
    Named { bindings: Vec<(String, usize)> },
    /// One entity or map argument; placeholders resolve to its members.
    Structured { arg: usize },
    /// Composite identifier; every placeholder must name an id member.
    CompositeId { arg: usize },
    /// One collection argument executed once per element.
    Bulk { arg: usize, item: ItemBinding },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    pub shape: BindingShape,
    /// Distinct named placeholders of the statement, in first-use order.
    pub placeholders: Vec<String>,
    /// `{name}` template markers and the argument supplying each.
    pub defines: Vec<(String, usize)>,
    pub callbacks: CallbackSlots,
}

impl ParameterBinding {
    pub fn none() -> Self {
        Self {
            shape: BindingShape::None,
            placeholders: Vec::new(),
            defines: Vec::new(),
            callbacks: CallbackSlots::default(),
        }
    }

    /// Structured binding of `names`, used by synthesized operations.
    pub fn structured(arg: usize, names: Vec<String>) -> Self {
        Self {
            shape: BindingShape::Structured { arg },
            placeholders: names,
            ..Self::none()
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self.shape, BindingShape::Bulk { .. })
    }

    /// Bind the arguments of one (non-bulk) call.
    pub fn bind(&self, args: &[Arg], target: &mut dyn ParamTarget) -> Result<()> {
        match &self.shape {
            BindingShape::None => Ok(()),
            BindingShape::PositionalSingle { arg } => {
                target.set(0, arg_value(args, *arg)?.clone())
            }
            BindingShape::PositionalArray { args: idx } => {
                for (pos, i) in idx.iter().enumerate() {
                    target.set(pos, arg_value(args, *i)?.clone())?;
                }
                Ok(())
            }
            BindingShape::Spread { arg } => spread(arg_value(args, *arg)?, target),
            BindingShape::Named { bindings } => {
                for (name, i) in bindings {
                    target.set_named(name, arg_value(args, *i)?.clone())?;
                }
                Ok(())
            }
            BindingShape::Structured { arg } => {
                bind_members(arg_value(args, *arg)?, &self.placeholders, false, target)
            }
            BindingShape::CompositeId { arg } => {
                bind_members(arg_value(args, *arg)?, &self.placeholders, true, target)
            }
            BindingShape::Bulk { .. } => Err(Error::Invariant(
                "bulk bindings are bound one element at a time".into(),
            )),
        }
    }

    /// Bind one element of a bulk argument.
    pub fn bind_item(&self, item: &Value, target: &mut dyn ParamTarget) -> Result<()> {
        match &self.shape {
            BindingShape::Bulk { item: how, .. } => match how {
                ItemBinding::Single => target.set(0, item.clone()),
                ItemBinding::Spread => spread(item, target),
                ItemBinding::Structured => bind_members(item, &self.placeholders, false, target),
                ItemBinding::Named(name) => target.set_named(name, item.clone()),
            },
            _ => Err(Error::Invariant("binding is not a bulk binding".into())),
        }
    }

    /// Elements of the bulk argument, in call order.
    pub fn bulk_items<'a>(&self, args: &'a [Arg]) -> Result<&'a [Value]> {
        match &self.shape {
            BindingShape::Bulk { arg, .. } => match arg_value(args, *arg)? {
                Value::List(items) => Ok(items),
                Value::Null => Ok(&[]),
                other => Err(Error::TypeMismatch(format!(
                    "bulk argument must be a list, got {}",
                    other.kind_name()
                ))),
            },
            _ => Err(Error::Invariant("binding is not a bulk binding".into())),
        }
    }

    /// SQL text after `{name}` template substitution; `None` when the method
    /// declares no templates.
    pub fn render_sql(&self, sql: &str, args: &[Arg]) -> Result<Option<String>> {
        if self.defines.is_empty() {
            return Ok(None);
        }
        let mut out = sql.to_string();
        for (name, i) in &self.defines {
            let text = match arg_value(args, *i)? {
                Value::Str(s) => s.clone(),
                Value::Int(n) => n.to_string(),
                Value::Float(f) => f.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::TypeMismatch(format!(
                        "template '{name}' needs a scalar value, got {}",
                        other.kind_name()
                    )))
                }
            };
            out = substitute_define(&out, name, &text);
        }
        Ok(Some(out))
    }

    pub fn row_mapper(&self, args: &[Arg]) -> Result<Option<RowMapperFn>> {
        match self.callbacks.row_mapper {
            None => Ok(None),
            Some(i) => match args.get(i) {
                Some(Arg::RowMapper(f)) => Ok(Some(f.clone())),
                _ => Err(Error::TypeMismatch(format!("argument {i} must be a row mapper"))),
            },
        }
    }

    pub fn extractor(&self, args: &[Arg]) -> Result<Option<ResultExtractorFn>> {
        match self.callbacks.extractor {
            None => Ok(None),
            Some(i) => match args.get(i) {
                Some(Arg::ResultExtractor(f)) => Ok(Some(f.clone())),
                _ => Err(Error::TypeMismatch(format!(
                    "argument {i} must be a result extractor"
                ))),
            },
        }
    }

    pub fn filter(&self, args: &[Arg]) -> Result<Option<RowFilterFn>> {
        match self.callbacks.filter {
            None => Ok(None),
            Some(i) => match args.get(i) {
                Some(Arg::RowFilter(f)) => Ok(Some(f.clone())),
                _ => Err(Error::TypeMismatch(format!("argument {i} must be a row filter"))),
            },
        }
    }
}

impl fmt::Display for BindingShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingShape::None => f.write_str("none"),
            BindingShape::PositionalSingle { arg } => write!(f, "positional(#{arg})"),
            BindingShape::PositionalArray { args } => write!(f, "positional{args:?}"),
            BindingShape::Spread { arg } => write!(f, "spread(#{arg})"),
            BindingShape::Named { bindings } => {
                let parts: Vec<String> = bindings.iter().map(|(n, i)| format!(":{n}=#{i}")).collect();
                write!(f, "named({})", parts.join(", "))
            }
            BindingShape::Structured { arg } => write!(f, "members(#{arg})"),
            BindingShape::CompositeId { arg } => write!(f, "id(#{arg})"),
            BindingShape::Bulk { arg, item } => write!(f, "bulk(#{arg}, {item:?})"),
        }
    }
}

/// Value argument at `i`; callbacks in value positions are a type error.
pub fn arg_value(args: &[Arg], i: usize) -> Result<&Value> {
    match args.get(i) {
        Some(Arg::Value(v)) => Ok(v),
        Some(other) => Err(Error::TypeMismatch(format!(
            "argument {i} must be a value, got {other:?}"
        ))),
        None => Err(Error::TypeMismatch(format!(
            "missing argument {i} ({} supplied)",
            args.len()
        ))),
    }
}

fn spread(value: &Value, target: &mut dyn ParamTarget) -> Result<()> {
    match value {
        Value::List(items) => {
            for (pos, v) in items.iter().enumerate() {
                target.set(pos, v.clone())?;
            }
            Ok(())
        }
        other => target.set(0, other.clone()),
    }
}

/// Resolve `a.b` style placeholder names against nested members.
fn member_path(value: &Value, path: &str) -> Option<Value> {
    let mut cur = value.clone();
    for part in path.split('.') {
        cur = cur.member(part)?;
    }
    Some(cur)
}

fn bind_members(
    value: &Value,
    names: &[String],
    strict: bool,
    target: &mut dyn ParamTarget,
) -> Result<()> {
    if !matches!(value, Value::Map(_) | Value::Entity(_)) {
        return Err(Error::TypeMismatch(format!(
            "expected an entity or map argument, got {}",
            value.kind_name()
        )));
    }
    for name in names {
        let v = match member_path(value, name) {
            Some(v) => v,
            None if strict => {
                return Err(Error::ParameterNotFound(format!(
                    "identifier has no member '{name}'"
                )))
            }
            None => Value::Null,
        };
        target.set_named(name, v)?;
    }
    Ok(())
}

/// Choose the binding shape of `method` against its resolved query.
/// `entity` is the interface entity, used to validate member names.
pub fn build_binding(
    method: &MethodDecl,
    desc: &QueryDescriptor,
    entity: Option<&EntityDescriptor>,
) -> Result<ParameterBinding> {
    let fail = |msg: String| Error::config(format!("method '{}': {msg}", method.name));

    let callbacks = callback_slots(method, desc)?;
    let is_callback = |i: usize| {
        Some(i) == callbacks.row_mapper || Some(i) == callbacks.extractor || Some(i) == callbacks.filter
    };

    let mut defines = Vec::new();
    let mut stmt: Vec<usize> = Vec::new();
    for (i, p) in method.params.iter().enumerate() {
        if is_callback(i) {
            continue;
        }
        if let Some(name) = &p.define {
            if p.bind.is_some() {
                return Err(fail(format!("parameter {i} is both a binding and a template")));
            }
            if !p.shape.is_scalar() {
                return Err(fail(format!("template '{name}' must be a scalar parameter")));
            }
            if !has_define(desc.text(), name) {
                return Err(fail(format!("template '{{{name}}}' does not appear in the SQL")));
            }
            defines.push((name.clone(), i));
            continue;
        }
        stmt.push(i);
    }

    let placeholders: Vec<String> = desc
        .sql
        .distinct_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let count = desc.sql.parameter_count();

    if desc.single_parameter && (stmt.len() > 1 || count > 1) {
        return Err(fail(format!(
            "declared as single-parameter but binds {} arguments to {count} placeholders",
            stmt.len()
        )));
    }

    let shape = if let Some(bulk) = bulk_shape(method, desc, &stmt)? {
        if let BindingShape::Bulk {
            item: ItemBinding::Structured,
            arg,
        } = &bulk
        {
            if let Some(TypeShape::Entity(name)) = method.params[*arg].shape.element() {
                check_members(method, name, entity, &placeholders)?;
            }
        }
        bulk
    } else if desc.named {
        named_shape(method, &stmt, &placeholders, entity)?
    } else {
        positional_shape(method, desc, &stmt, count)?
    };

    Ok(ParameterBinding {
        shape,
        placeholders,
        defines,
        callbacks,
    })
}

fn callback_slots(method: &MethodDecl, desc: &QueryDescriptor) -> Result<CallbackSlots> {
    let fail = |msg: String| Error::config(format!("method '{}': {msg}", method.name));
    let mut slots = CallbackSlots::default();
    let n = method.params.len();

    for (i, p) in method.params.iter().enumerate() {
        if !p.shape.is_callback() {
            continue;
        }
        if desc.verb.is_write() {
            return Err(fail("write operations cannot take row callbacks".into()));
        }
        let after = &method.params[i + 1..];
        match &p.shape {
            TypeShape::RowMapper(_) | TypeShape::ResultExtractor(_) if i + 1 != n => {
                return Err(fail(format!(
                    "{} must be the last parameter",
                    p.shape
                )))
            }
            TypeShape::RowFilter
                if !(after.is_empty()
                    || (after.len() == 1 && after[0].shape.is_row_mapper())) =>
            {
                return Err(fail("a row filter may only be followed by a row mapper".into()))
            }
            _ => {}
        }
        match &p.shape {
            TypeShape::RowMapper(_) => slots.row_mapper = Some(i),
            TypeShape::ResultExtractor(_) => {
                let kind_ok = matches!(desc.kind, OperationKind::Default | OperationKind::Query);
                if !kind_ok || !matches!(desc.verb, Verb::Select | Verb::Call) {
                    return Err(fail(format!(
                        "a result extractor cannot be combined with {:?} {:?}",
                        desc.verb, desc.kind
                    )));
                }
                slots.extractor = Some(i);
            }
            _ => slots.filter = Some(i),
        }
    }
    if slots.filter.is_some() && slots.extractor.is_some() {
        return Err(fail("a row filter cannot be combined with a result extractor".into()));
    }
    Ok(slots)
}

/// Write methods taking one collection of rows run once per element.
fn bulk_shape(
    method: &MethodDecl,
    desc: &QueryDescriptor,
    stmt: &[usize],
) -> Result<Option<BindingShape>> {
    let fail = |msg: &str| Error::config(format!("method '{}': {msg}", method.name));
    if !desc.verb.is_write() || stmt.len() != 1 {
        return Ok(None);
    }
    let arg = stmt[0];
    let param = &method.params[arg];
    if !param.shape.is_multi() || desc.single_parameter {
        return Ok(None);
    }
    let Some(element) = param.shape.element() else {
        return Ok(None);
    };
    if !(desc.is_batch || element.is_structured() || element.is_multi()) {
        return Ok(None);
    }

    let item = if element.is_structured() {
        if !desc.named {
            return Err(fail("structured batch elements require a named query"));
        }
        ItemBinding::Structured
    } else if element.is_multi() {
        if desc.named {
            return Err(fail("list batch elements require a positional query"));
        }
        ItemBinding::Spread
    } else if desc.named {
        match &param.bind {
            Some(name) => ItemBinding::Named(name.clone()),
            None => return Err(fail("named query requires binding-name tags")),
        }
    } else {
        if param.bind.is_some() {
            return Err(fail("binding-name tags declared for a non-named query"));
        }
        ItemBinding::Single
    };
    Ok(Some(BindingShape::Bulk { arg, item }))
}

fn named_shape(
    method: &MethodDecl,
    stmt: &[usize],
    placeholders: &[String],
    entity: Option<&EntityDescriptor>,
) -> Result<BindingShape> {
    let fail = |msg: String| Error::config(format!("method '{}': {msg}", method.name));

    if let [arg] = stmt {
        let p = &method.params[*arg];
        if p.shape.is_structured() && p.bind.is_none() {
            return Ok(match &p.shape {
                TypeShape::EntityId => BindingShape::CompositeId { arg: *arg },
                TypeShape::Entity(name) => {
                    check_members(method, name, entity, placeholders)?;
                    BindingShape::Structured { arg: *arg }
                }
                _ => BindingShape::Structured { arg: *arg },
            });
        }
    }

    let mut bindings: Vec<(String, usize)> = Vec::with_capacity(stmt.len());
    for &i in stmt {
        let p = &method.params[i];
        let Some(name) = &p.bind else {
            return Err(fail(if p.shape.is_structured() {
                format!("structured parameter {i} needs a binding-name tag when other parameters are bound")
            } else {
                format!("named query requires a binding-name tag on parameter {i}")
            }));
        };
        if bindings.iter().any(|(n, _)| n == name) {
            return Err(fail(format!("binding name '{name}' is declared twice")));
        }
        if !placeholders.iter().any(|n| n == name) {
            return Err(fail(format!("no placeholder ':{name}' in the SQL")));
        }
        bindings.push((name.clone(), i));
    }
    if let Some(missing) = placeholders
        .iter()
        .find(|n| !bindings.iter().any(|(b, _)| b == *n))
    {
        return Err(fail(format!("placeholder ':{missing}' has no bound parameter")));
    }
    Ok(if bindings.is_empty() {
        BindingShape::None
    } else {
        BindingShape::Named { bindings }
    })
}

fn positional_shape(
    method: &MethodDecl,
    desc: &QueryDescriptor,
    stmt: &[usize],
    count: usize,
) -> Result<BindingShape> {
    let fail = |msg: String| Error::config(format!("method '{}': {msg}", method.name));

    for &i in stmt {
        let p = &method.params[i];
        if p.bind.is_some() {
            return Err(fail("binding-name tags declared for a non-named query".into()));
        }
        if p.shape.is_structured() {
            return Err(fail(format!(
                "structured parameter {i} ({}) requires a named query",
                p.shape
            )));
        }
    }

    match stmt {
        [] if count == 0 => Ok(BindingShape::None),
        [] => Err(fail(format!("SQL expects {count} parameters but none are declared"))),
        [arg] => {
            let p = &method.params[*arg];
            if p.shape.is_multi() && !desc.single_parameter {
                Ok(BindingShape::Spread { arg: *arg })
            } else if count == 1 {
                Ok(BindingShape::PositionalSingle { arg: *arg })
            } else {
                Err(fail(format!("one parameter declared for {count} placeholders")))
            }
        }
        many if many.len() == count => Ok(BindingShape::PositionalArray {
            args: many.to_vec(),
        }),
        many => Err(fail(format!(
            "{} parameters declared for {count} placeholders",
            many.len()
        ))),
    }
}

fn check_members(
    method: &MethodDecl,
    entity_name: &str,
    entity: Option<&EntityDescriptor>,
    placeholders: &[String],
) -> Result<()> {
    let Some(desc) = entity.filter(|e| e.name == entity_name) else {
        return Ok(());
    };
    for name in placeholders {
        let head = name.split('.').next().unwrap_or(name);
        if desc.find(head).is_none() {
            return Err(Error::config(format!(
                "method '{}': entity {} has no property '{head}'",
                method.name, desc.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use daoplan_core::config::DaoConfig;
    use daoplan_core::decl::{OpTag, ParamDecl, PropertyDecl};
    use daoplan_core::value::Record;
    use std::collections::BTreeMap;

    use crate::resolve::resolve;

    #[derive(Default)]
    struct Capture {
        positional: BTreeMap<usize, Value>,
        named: Vec<(String, Value)>,
    }

    impl ParamTarget for Capture {
        fn set(&mut self, index: usize, value: Value) -> Result<()> {
            self.positional.insert(index, value);
            Ok(())
        }

        fn set_named(&mut self, name: &str, value: Value) -> Result<()> {
            self.named.push((name.to_string(), value));
            Ok(())
        }
    }

    fn plan(method: &MethodDecl) -> Result<ParameterBinding> {
        let tag = method.op.clone().expect("tag");
        let desc = resolve(method, &tag, None, &DaoConfig::default())?;
        build_binding(method, &desc, Some(&account()))
    }

    fn account() -> EntityDescriptor {
        EntityDescriptor::new("Account")
            .property(PropertyDecl::new("id", TypeShape::i64()))
            .property(PropertyDecl::new("name", TypeShape::Str))
            .id_property("id")
    }

    #[test]
    fn positional_shapes() {
        let m = MethodDecl::new("find", TypeShape::Str)
            .arg(TypeShape::i64())
            .op(OpTag::select("SELECT name FROM t WHERE id = ?"));
        assert_eq!(plan(&m).expect("bind").shape, BindingShape::PositionalSingle { arg: 0 });

        let m = MethodDecl::new("find", TypeShape::Str)
            .arg(TypeShape::i64())
            .arg(TypeShape::Str)
            .op(OpTag::select("SELECT name FROM t WHERE id = ? AND name = ?"));
        let b = plan(&m).expect("bind");
        assert_eq!(b.shape, BindingShape::PositionalArray { args: vec![0, 1] });

        let mut cap = Capture::default();
        b.bind(&[Arg::from(1i64), Arg::from("x")], &mut cap).expect("bind");
        assert_eq!(cap.positional.get(&1), Some(&Value::Str("x".into())));
    }

    #[test]
    fn collections_spread_unless_single_parameter() {
        let m = MethodDecl::new("find", TypeShape::list(TypeShape::Str))
            .arg(TypeShape::list(TypeShape::i64()))
            .op(OpTag::select("SELECT name FROM t WHERE id IN (?, ?, ?)"));
        let b = plan(&m).expect("bind");
        assert_eq!(b.shape, BindingShape::Spread { arg: 0 });
        let mut cap = Capture::default();
        b.bind(&[Arg::from(vec![1i64, 2, 3])], &mut cap).expect("bind");
        assert_eq!(cap.positional.len(), 3);

        let m = MethodDecl::new("find", TypeShape::list(TypeShape::Str))
            .arg(TypeShape::list(TypeShape::i64()))
            .op(OpTag::select("SELECT name FROM t WHERE tags = ?").single_parameter());
        assert_eq!(plan(&m).expect("bind").shape, BindingShape::PositionalSingle { arg: 0 });
    }

    #[test]
    fn single_parameter_with_several_placeholders_is_rejected() {
        let m = MethodDecl::new("find", TypeShape::Str)
            .arg(TypeShape::list(TypeShape::i64()))
            .op(OpTag::select("SELECT name FROM t WHERE a = ? AND b = ?").single_parameter());
        assert!(plan(&m).unwrap_err().is_config());
    }

    #[test]
    fn structured_arguments_need_a_named_query() {
        let m = MethodDecl::new("update", TypeShape::i32())
            .arg(TypeShape::entity("Account"))
            .op(OpTag::update("UPDATE account SET name = ? WHERE id = ?"));
        assert!(plan(&m).unwrap_err().is_config());

        let m = MethodDecl::new("update", TypeShape::i32())
            .arg(TypeShape::entity("Account"))
            .op(OpTag::named_update("UPDATE account SET name = :name WHERE id = :id"));
        let b = plan(&m).expect("bind");
        assert_eq!(b.shape, BindingShape::Structured { arg: 0 });

        let rec = Record::new("Account").with("id", 4i64).with("name", "ada");
        let mut cap = Capture::default();
        b.bind(&[Arg::from(rec)], &mut cap).expect("bind");
        assert_eq!(
            cap.named,
            vec![
                ("name".to_string(), Value::Str("ada".into())),
                ("id".to_string(), Value::Int(4)),
            ]
        );
    }

    #[test]
    fn unknown_entity_members_fail_at_bind_time() {
        let m = MethodDecl::new("update", TypeShape::i32())
            .arg(TypeShape::entity("Account"))
            .op(OpTag::named_update("UPDATE account SET email = :email WHERE id = :id"));
        let err = plan(&m).unwrap_err();
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn tags_must_match_the_query_style() {
        let m = MethodDecl::new("find", TypeShape::Str)
            .named_arg("id", TypeShape::i64())
            .op(OpTag::select("SELECT name FROM t WHERE id = ?"));
        assert!(plan(&m).unwrap_err().is_config());

        let m = MethodDecl::new("find", TypeShape::Str)
            .arg(TypeShape::i64())
            .arg(TypeShape::Str)
            .op(OpTag::named_select("SELECT name FROM t WHERE id = :id AND name = :name"));
        assert!(plan(&m).unwrap_err().is_config());

        let m = MethodDecl::new("find", TypeShape::Str)
            .named_arg("id", TypeShape::i64())
            .named_arg("nam", TypeShape::Str)
            .op(OpTag::named_select("SELECT name FROM t WHERE id = :id AND name = :name"));
        assert!(plan(&m).unwrap_err().to_string().contains(":nam"));
    }

    #[test]
    fn named_arguments_and_templates() {
        let m = MethodDecl::new("find", TypeShape::list(TypeShape::Str))
            .param(ParamDecl::new(TypeShape::Str).define("table"))
            .named_arg("id", TypeShape::i64())
            .op(OpTag::named_select("SELECT name FROM {table} WHERE id = :id OR parent = :id"));
        let b = plan(&m).expect("bind");
        assert_eq!(
            b.shape,
            BindingShape::Named {
                bindings: vec![("id".into(), 1)]
            }
        );
        let args = [Arg::from("account_2024"), Arg::from(5i64)];
        let sql = b
            .render_sql("SELECT name FROM {table} WHERE id = :id", &args)
            .expect("render");
        assert_eq!(sql.as_deref(), Some("SELECT name FROM account_2024 WHERE id = :id"));
    }

    #[test]
    fn trailing_callbacks_are_skipped_and_validated() {
        let m = MethodDecl::new("findNames", TypeShape::list(TypeShape::Str))
            .arg(TypeShape::i64())
            .arg(TypeShape::RowFilter)
            .arg(TypeShape::row_mapper(TypeShape::Str))
            .op(OpTag::select("SELECT name FROM t WHERE id > ?"));
        let b = plan(&m).expect("bind");
        assert_eq!(b.shape, BindingShape::PositionalSingle { arg: 0 });
        assert_eq!(b.callbacks.filter, Some(1));
        assert_eq!(b.callbacks.row_mapper, Some(2));

        let m = MethodDecl::new("findNames", TypeShape::list(TypeShape::Str))
            .arg(TypeShape::row_mapper(TypeShape::Str))
            .arg(TypeShape::i64())
            .op(OpTag::select("SELECT name FROM t WHERE id > ?"));
        assert!(plan(&m).unwrap_err().is_config());

        let m = MethodDecl::new("first", TypeShape::Str)
            .arg(TypeShape::result_extractor(TypeShape::Str))
            .op(OpTag::select("SELECT name FROM t").kind(OperationKind::FindFirst));
        assert!(plan(&m).unwrap_err().is_config());
    }

    #[test]
    fn write_collections_become_bulk_bindings() {
        let m = MethodDecl::new("insertAll", TypeShape::Unit)
            .arg(TypeShape::list(TypeShape::entity("Account")))
            .op(OpTag::named_insert("INSERT INTO account (id, name) VALUES (:id, :name)"));
        let b = plan(&m).expect("bind");
        assert_eq!(
            b.shape,
            BindingShape::Bulk {
                arg: 0,
                item: ItemBinding::Structured
            }
        );
        let items = vec![
            Value::from(Record::new("Account").with("id", 1i64)),
            Value::from(Record::new("Account").with("id", 2i64)),
        ];
        let args = [Arg::Value(Value::List(items))];
        assert_eq!(b.bulk_items(&args).expect("items").len(), 2);

        let m = MethodDecl::new("deleteAll", TypeShape::Unit)
            .arg(TypeShape::list(TypeShape::i64()))
            .op(OpTag::delete("DELETE FROM account WHERE id = ?").batch(2));
        let b = plan(&m).expect("bind");
        assert_eq!(
            b.shape,
            BindingShape::Bulk {
                arg: 0,
                item: ItemBinding::Single
            }
        );
    }

    #[test]
    fn composite_ids_require_every_member() {
        let m = MethodDecl::new("get", TypeShape::entity("Line"))
            .arg(TypeShape::EntityId)
            .op(OpTag::named_select("SELECT * FROM line WHERE order_id = :orderId AND no = :no"));
        let b = plan(&m).expect("bind");
        assert_eq!(b.shape, BindingShape::CompositeId { arg: 0 });

        let mut id = BTreeMap::new();
        id.insert("orderId".to_string(), Value::Int(1));
        let mut cap = Capture::default();
        let err = b.bind(&[Arg::Value(Value::Map(id))], &mut cap).unwrap_err();
        assert!(matches!(err, Error::ParameterNotFound(_)));
    }
}
