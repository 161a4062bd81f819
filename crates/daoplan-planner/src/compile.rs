//! Method plans: everything the runtime needs to execute one method, decided
//! once at bind time.
//!
//! A `MethodPlan` is plain data. The exec crate turns each plan into a
//! callable; nothing here inspects argument values.

use std::fmt;

use daoplan_core::config::DaoConfig;
use daoplan_core::decl::{
    EntityDescriptor, InterfaceDecl, MethodDecl, NonDb, OperationKind, QueryDescriptor, Verb,
};
use daoplan_core::error::{Error, Result};
use daoplan_core::id::MethodId;
use daoplan_core::mapper::SqlLookup;
use daoplan_core::naming::NamingPolicy;
use daoplan_core::shape::{IntWidth, TypeShape};

use crate::binding::{build_binding, BindingShape, ItemBinding, ParameterBinding};
use crate::classify::{classify, Classification};
use crate::resolve::resolve;

/// How an update count becomes the method's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountReturn {
    Discard,
    /// `count > 0`
    Bool,
    /// Range-checked narrowing.
    Int(IntWidth),
}

/// What an insert hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum IdReturn {
    Discard,
    /// The generated (or pre-existing) identifier, coerced to this shape.
    Id(TypeShape),
}

/// How one result row becomes a value.
#[derive(Debug, Clone, PartialEq)]
pub enum RowConversion {
    /// Caller-supplied row mapper.
    Mapper,
    Entity(String),
    Map,
    /// First column, coerced.
    Scalar(TypeShape),
    /// All columns as a list.
    Values,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadAction {
    Exists,
    List(RowConversion),
    Stream(RowConversion),
    /// At most one row; more is `DuplicatedResult`.
    Unique { row: RowConversion, optional: bool },
    FindFirst { row: RowConversion, optional: bool },
    /// First column of the first row.
    Single { shape: TypeShape, optional: bool },
    RowSet,
    Extract,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteAction {
    Insert { id: IdReturn },
    BatchInsert { id: IdReturn },
    Update { count: CountReturn },
    BatchUpdate { count: CountReturn },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallAction {
    Discard,
    Count(CountReturn),
    RowSet,
    List(RowConversion),
    Extract,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanBody {
    Read {
        query: QueryDescriptor,
        binding: ParameterBinding,
        action: ReadAction,
    },
    Write {
        query: QueryDescriptor,
        binding: ParameterBinding,
        action: WriteAction,
    },
    Call {
        query: QueryDescriptor,
        binding: ParameterBinding,
        action: CallAction,
    },
    /// Entity insert choosing its SQL by whether the id is already set.
    EntityInsert {
        with_id: QueryDescriptor,
        without_id: Option<QueryDescriptor>,
        binding: ParameterBinding,
        id: IdReturn,
    },
    NonDb(NonDb),
}

/// Statement-level logging of one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatementLog {
    pub sql: bool,
    pub min_sql_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodPlan {
    pub id: MethodId,
    pub returns: TypeShape,
    /// Interface entity; drives row mapping and id write-back.
    pub entity: Option<EntityDescriptor>,
    pub naming: NamingPolicy,
    pub log: StatementLog,
    pub body: PlanBody,
}

impl MethodPlan {
    pub fn query(&self) -> Option<&QueryDescriptor> {
        match &self.body {
            PlanBody::Read { query, .. }
            | PlanBody::Write { query, .. }
            | PlanBody::Call { query, .. } => Some(query),
            PlanBody::EntityInsert { with_id, .. } => Some(with_id),
            PlanBody::NonDb(_) => None,
        }
    }

    pub fn binding(&self) -> Option<&ParameterBinding> {
        match &self.body {
            PlanBody::Read { binding, .. }
            | PlanBody::Write { binding, .. }
            | PlanBody::Call { binding, .. }
            | PlanBody::EntityInsert { binding, .. } => Some(binding),
            PlanBody::NonDb(_) => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.body,
            PlanBody::Write { .. } | PlanBody::Call { .. } | PlanBody::EntityInsert { .. }
        )
    }

    pub fn is_non_db(&self) -> bool {
        matches!(self.body, PlanBody::NonDb(_))
    }

    /// Short label of the action, used by explain output and logs.
    pub fn action_label(&self) -> String {
        match &self.body {
            PlanBody::Read { action, .. } => format!("{action:?}"),
            PlanBody::Write { action, .. } => format!("{action:?}"),
            PlanBody::Call { action, .. } => format!("Call::{action:?}"),
            PlanBody::EntityInsert { id, .. } => format!("EntityInsert {{ id: {id:?} }}"),
            PlanBody::NonDb(n) => format!("NonDb::{n:?}"),
        }
    }
}

impl fmt::Display for MethodPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}  [{}]", self.id, self.returns, self.action_label())?;
        if let Some(b) = self.binding() {
            write!(f, "  binding={}", b.shape)?;
        }
        if let Some(q) = self.query() {
            write!(f, "\n    sql: {}", q.text())?;
        }
        Ok(())
    }
}

pub(crate) fn statement_log(method: &MethodDecl, iface: &InterfaceDecl, cfg: &DaoConfig) -> StatementLog {
    StatementLog {
        sql: method.sql_log.unwrap_or(iface.sql_log || cfg.sql_log),
        min_sql_ms: method
            .perf_log
            .or(iface.perf_log)
            .map(|p| p.min_sql_ms)
            .unwrap_or(0),
    }
}

/// Compile a method that carries an operation tag or a non-database response.
pub fn compile_method(
    interface: &InterfaceDecl,
    method: &MethodDecl,
    lookup: Option<&dyn SqlLookup>,
    cfg: &DaoConfig,
) -> Result<MethodPlan> {
    let id = MethodId::new(&interface.name, &method.name);
    let entity = interface.entity.clone();
    let log = statement_log(method, interface, cfg);

    if let Some(non_db) = &method.non_db {
        if method.op.is_some() {
            return Err(Error::config(format!(
                "method '{}' declares both SQL and a non-database response",
                method.name
            )));
        }
        return Ok(MethodPlan {
            id,
            returns: method.returns.clone(),
            entity,
            naming: interface.naming,
            log,
            body: PlanBody::NonDb(non_db.clone()),
        });
    }

    let tag = method.op.as_ref().ok_or_else(|| {
        Error::config(format!(
            "method '{}' has no operation tag and is not a synthesized operation",
            method.name
        ))
    })?;
    let query = resolve(method, tag, lookup, cfg)?;
    let binding = build_binding(method, &query, entity.as_ref())?;

    let body = match query.verb {
        Verb::Select => {
            let class = classify(method, query.kind)?;
            let action = read_action(method, &query, &binding, class)?;
            PlanBody::Read {
                query,
                binding,
                action,
            }
        }
        Verb::Insert | Verb::Update | Verb::Delete => {
            let action = write_action(method, &query, &binding, entity.as_ref())?;
            PlanBody::Write {
                query,
                binding,
                action,
            }
        }
        Verb::Call => {
            let action = call_action(method, &binding)?;
            PlanBody::Call {
                query,
                binding,
                action,
            }
        }
    };

    let plan = MethodPlan {
        id,
        returns: method.returns.clone(),
        entity,
        naming: interface.naming,
        log,
        body,
    };
    tracing::debug!(method = %plan.id, action = %plan.action_label(), "compiled method plan");
    Ok(plan)
}

fn read_action(
    method: &MethodDecl,
    query: &QueryDescriptor,
    binding: &ParameterBinding,
    class: Classification,
) -> Result<ReadAction> {
    let fail = |msg: String| Error::config(format!("method '{}': {msg}", method.name));
    let mapper = binding.callbacks.row_mapper.is_some();
    let returns = &method.returns;

    if binding.callbacks.extractor.is_some() {
        return Ok(ReadAction::Extract);
    }
    if class.is_exists_query {
        return Ok(ReadAction::Exists);
    }
    if class.is_list_query {
        let element = returns.element().unwrap_or(&TypeShape::Any);
        return Ok(ReadAction::List(row_conversion(method, element, mapper)?));
    }

    let (inner, optional) = match returns {
        TypeShape::Optional(t) => (t.as_ref(), true),
        other => (other, false),
    };

    let action = match query.kind {
        OperationKind::Stream => match returns {
            TypeShape::Stream(t) => ReadAction::Stream(row_conversion(method, t, mapper)?),
            other => return Err(fail(format!("stream query must return a stream, not {other}"))),
        },
        OperationKind::Query => match returns {
            TypeShape::RowSet => ReadAction::RowSet,
            other => return Err(fail(format!("row-set query must return RowSet, not {other}"))),
        },
        OperationKind::Get => ReadAction::Unique {
            row: row_conversion(method, inner, mapper)?,
            optional,
        },
        OperationKind::FindFirst => ReadAction::FindFirst {
            row: row_conversion(method, inner, mapper)?,
            optional,
        },
        OperationKind::QueryForSingle => {
            if !inner.is_scalar() {
                return Err(fail(format!("single-value query cannot return {returns}")));
            }
            ReadAction::Single {
                shape: inner.clone(),
                optional,
            }
        }
        _ => match returns {
            TypeShape::Unit => return Err(fail("select methods must return a value".into())),
            TypeShape::Stream(t) => ReadAction::Stream(row_conversion(method, t, mapper)?),
            TypeShape::RowSet => ReadAction::RowSet,
            _ if mapper => ReadAction::FindFirst {
                row: RowConversion::Mapper,
                optional,
            },
            _ if inner.is_scalar() => ReadAction::Single {
                shape: inner.clone(),
                optional,
            },
            _ => ReadAction::FindFirst {
                row: row_conversion(method, inner, mapper)?,
                optional,
            },
        },
    };

    if returns.is_stream() && !matches!(action, ReadAction::Stream(_)) {
        return Err(fail(format!("{:?} query cannot return a stream", query.kind)));
    }
    Ok(action)
}

fn row_conversion(method: &MethodDecl, shape: &TypeShape, mapper: bool) -> Result<RowConversion> {
    if mapper {
        return Ok(RowConversion::Mapper);
    }
    match shape {
        TypeShape::Entity(name) => Ok(RowConversion::Entity(name.clone())),
        TypeShape::Map | TypeShape::EntityId => Ok(RowConversion::Map),
        TypeShape::List(_) | TypeShape::Set(_) | TypeShape::Slice(_) => Ok(RowConversion::Values),
        s if s.is_scalar() => Ok(RowConversion::Scalar(s.clone())),
        other => Err(Error::config(format!(
            "method '{}': a result row cannot be converted to {other}",
            method.name
        ))),
    }
}

/// Update-count conversion for a return shape.
pub fn count_return(method: &MethodDecl) -> Result<CountReturn> {
    match &method.returns {
        TypeShape::Unit => Ok(CountReturn::Discard),
        TypeShape::Bool => Ok(CountReturn::Bool),
        TypeShape::Int(w) => Ok(CountReturn::Int(*w)),
        TypeShape::Any => Ok(CountReturn::Int(IntWidth::I64)),
        other => Err(Error::config(format!(
            "method '{}': an update count cannot be returned as {other}",
            method.name
        ))),
    }
}

/// The entity an insert writes, when it is the interface entity.
fn inserted_entity<'a>(
    method: &MethodDecl,
    binding: &ParameterBinding,
    entity: Option<&'a EntityDescriptor>,
) -> Option<&'a EntityDescriptor> {
    let shape = match &binding.shape {
        BindingShape::Structured { arg } => Some(&method.params[*arg].shape),
        BindingShape::Bulk {
            arg,
            item: ItemBinding::Structured,
        } => method.params[*arg].shape.element(),
        _ => None,
    };
    match (shape, entity) {
        (Some(TypeShape::Entity(name)), Some(e)) if *name == e.name => Some(e),
        _ => None,
    }
}

/// Id return of an insert. Keyless entities have nothing to hand back.
pub fn id_return(
    method: &MethodDecl,
    entity: Option<&EntityDescriptor>,
    batch: bool,
) -> Result<IdReturn> {
    let fail = |msg: String| Error::config(format!("method '{}': {msg}", method.name));
    let returns = &method.returns;
    if returns.is_unit() {
        return Ok(IdReturn::Discard);
    }
    if let Some(e) = entity.filter(|e| e.is_keyless()) {
        return Err(fail(format!(
            "entity {} has no id property, so an insert cannot return {returns}",
            e.name
        )));
    }
    let id_shape = if batch {
        match returns {
            TypeShape::List(t) => t.as_ref(),
            other => return Err(fail(format!("batch insert must return a list of ids, not {other}"))),
        }
    } else {
        returns
    };
    let id_shape = match id_shape {
        TypeShape::Optional(t) => t.as_ref(),
        other => other,
    };
    match id_shape {
        TypeShape::Int(_) | TypeShape::Str | TypeShape::Any | TypeShape::EntityId | TypeShape::Map => {
            Ok(IdReturn::Id(id_shape.clone()))
        }
        other => Err(fail(format!("an insert cannot return {other}"))),
    }
}

fn write_action(
    method: &MethodDecl,
    query: &QueryDescriptor,
    binding: &ParameterBinding,
    entity: Option<&EntityDescriptor>,
) -> Result<WriteAction> {
    let bulk = binding.is_bulk();
    let counting = matches!(query.kind, OperationKind::Update | OperationKind::LargeUpdate);

    if query.verb == Verb::Insert && !counting {
        let target = inserted_entity(method, binding, entity);
        let id = id_return(method, target, bulk)?;
        return Ok(if bulk {
            WriteAction::BatchInsert { id }
        } else {
            WriteAction::Insert { id }
        });
    }

    let count = count_return(method)?;
    if query.kind == OperationKind::LargeUpdate
        && matches!(count, CountReturn::Int(w) if w != IntWidth::I64)
    {
        return Err(Error::config(format!(
            "method '{}': large updates must return i64",
            method.name
        )));
    }
    Ok(if bulk {
        WriteAction::BatchUpdate { count }
    } else {
        WriteAction::Update { count }
    })
}

fn call_action(method: &MethodDecl, binding: &ParameterBinding) -> Result<CallAction> {
    if binding.callbacks.extractor.is_some() {
        return Ok(CallAction::Extract);
    }
    let mapper = binding.callbacks.row_mapper.is_some();
    match &method.returns {
        TypeShape::Unit => Ok(CallAction::Discard),
        TypeShape::RowSet => Ok(CallAction::RowSet),
        TypeShape::List(t) | TypeShape::Set(t) => {
            Ok(CallAction::List(row_conversion(method, t, mapper)?))
        }
        TypeShape::Bool | TypeShape::Int(_) => Ok(CallAction::Count(count_return(method)?)),
        other => Err(Error::config(format!(
            "method '{}': a procedure call cannot return {other}",
            method.name
        ))),
    }
}
