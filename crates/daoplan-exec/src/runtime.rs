//! Turns a compiled `MethodPlan` into a callable.
//!
//! Each call leases a connection (the ambient transaction's, if any),
//! prepares one statement, binds, executes and converts the result to the
//! declared return shape. The statement is released on every path.

use std::borrow::Cow;
use std::sync::Arc;

use daoplan_core::cache::CacheStore;
use daoplan_core::call::{Arg, Output};
use daoplan_core::config::DaoConfig;
use daoplan_core::connect::{DataSource, ExecOutcome, StatementOptions};
use daoplan_core::decl::{EntityDescriptor, NonDb, QueryDescriptor};
use daoplan_core::error::{Error, Result};
use daoplan_core::sql::ParsedSql;
use daoplan_core::value::{Row, RowSet, Value};
use daoplan_planner::binding::arg_value;
use daoplan_planner::{
    BindingShape, CallAction, IdReturn, MethodPlan, ParameterBinding, PlanBody, ReadAction,
    RowConversion, StatementLog, WriteAction,
};

use crate::batch::BatchRun;
use crate::convert::{coerce, count_output, default_of, id_value, inserted_id, RowContext};
use crate::hooks::{CallContext, HookRegistry};
use crate::pipeline::Invoker;
use crate::query::PreparedQuery;
use crate::stream;
use crate::tx::ConnectionLease;

/// Everything a bound interface shares between its methods.
pub(crate) struct Env {
    pub datasource: Arc<dyn DataSource>,
    pub config: DaoConfig,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub hooks: HookRegistry,
}

/// Build the undecorated callable of `plan`. Problems that can be found
/// without running the plan are reported here, at bind time.
pub(crate) fn instantiate(plan: &MethodPlan, env: &Arc<Env>) -> Result<Invoker> {
    if let PlanBody::NonDb(n) = &plan.body {
        return non_db(plan, n, env);
    }
    let without_id = match &plan.body {
        PlanBody::EntityInsert {
            without_id: Some(q),
            binding,
            ..
        } => {
            let mut without = binding.clone();
            without.placeholders = q.sql.distinct_names().into_iter().map(str::to_string).collect();
            Some(Arc::new(without))
        }
        _ => None,
    };
    let plan = Arc::new(plan.clone());
    let env = env.clone();
    Ok(Arc::new(move |_: &CallContext, args: &[Arg]| {
        run(&plan, &env, args, without_id.as_ref())
    }))
}

fn non_db(plan: &MethodPlan, n: &NonDb, env: &Arc<Env>) -> Result<Invoker> {
    let entity = || {
        plan.entity.as_ref().ok_or_else(|| {
            Error::config(format!("method '{}' needs an interface entity", plan.id))
        })
    };
    let fixed = match n {
        NonDb::Constant(v) => v.clone(),
        NonDb::EntityName => Value::Str(entity()?.name.clone()),
        NonDb::TableName => Value::Str(entity()?.table_name(plan.naming)),
        NonDb::DataSourceId => Value::Str(env.datasource.id().to_string()),
        NonDb::Accessor(f) => {
            let f = f.0.clone();
            return Ok(Arc::new(move |_: &CallContext, args: &[Arg]| {
                f(args).map(Output::Value)
            }));
        }
    };
    Ok(Arc::new(move |_: &CallContext, _: &[Arg]| Ok(Output::Value(fixed.clone()))))
}

fn run(
    plan: &MethodPlan,
    env: &Env,
    args: &[Arg],
    without_id: Option<&Arc<ParameterBinding>>,
) -> Result<Output> {
    let exec = Exec { plan, env };
    match &plan.body {
        PlanBody::Read {
            query,
            binding,
            action,
        } => exec.read(query, binding, action, args),
        PlanBody::Write {
            query,
            binding,
            action,
        } => exec.write(query, binding, action, args),
        PlanBody::Call {
            query,
            binding,
            action,
        } => exec.call(query, binding, action, args),
        PlanBody::EntityInsert {
            with_id,
            without_id: without_q,
            binding,
            id,
        } => {
            let unset = without_q.is_some() && exec.ids_unset(binding, args)?;
            let (query, binding) = match (without_q, without_id) {
                (Some(q), Some(b)) if unset => (q, b.as_ref()),
                _ => (with_id, binding),
            };
            if binding.is_bulk() {
                exec.insert_many(query, binding, id, args)
            } else {
                exec.insert_one(query, binding, id, args)
            }
        }
        PlanBody::NonDb(_) => Err(Error::Invariant(format!(
            "non-database method '{}' reached the statement runtime",
            plan.id
        ))),
    }
}

struct Exec<'a> {
    plan: &'a MethodPlan,
    env: &'a Env,
}

impl Exec<'_> {
    fn log(&self) -> StatementLog {
        self.plan.log
    }

    fn options(&self, query: &QueryDescriptor) -> StatementOptions {
        StatementOptions {
            fetch_size: query.fetch_size,
            query_timeout: query.query_timeout,
            max_rows: None,
            return_generated_keys: false,
        }
    }

    fn sql<'q>(
        &self,
        query: &'q QueryDescriptor,
        binding: &ParameterBinding,
        args: &[Arg],
    ) -> Result<Cow<'q, ParsedSql>> {
        Ok(match binding.render_sql(query.text(), args)? {
            Some(text) => Cow::Owned(ParsedSql::parse(&text)?),
            None => Cow::Borrowed(&query.sql),
        })
    }

    fn prepare(
        &self,
        sql: &ParsedSql,
        options: &StatementOptions,
        binding: &ParameterBinding,
        args: &[Arg],
    ) -> Result<PreparedQuery> {
        let lease = ConnectionLease::acquire(self.env.datasource.as_ref())?;
        let mut q = PreparedQuery::prepare(lease, sql, options, self.log())?;
        binding.bind(args, &mut q)?;
        Ok(q)
    }

    fn row_context(&self, binding: &ParameterBinding, args: &[Arg]) -> Result<RowContext> {
        Ok(RowContext {
            entity: self.plan.entity.clone(),
            naming: self.plan.naming,
            mapper: binding.row_mapper(args)?,
        })
    }

    fn read(
        &self,
        query: &QueryDescriptor,
        binding: &ParameterBinding,
        action: &ReadAction,
        args: &[Arg],
    ) -> Result<Output> {
        let sql = self.sql(query, binding, args)?;
        let filter = binding.filter(args)?;
        let ctx = self.row_context(binding, args)?;
        let mut options = self.options(query);

        if let ReadAction::Stream(conv) = action {
            options.fetch_size = options.fetch_size.or(self.env.config.stream_fetch_size);
            let datasource = self.env.datasource.clone();
            let sql = sql.into_owned();
            let binding = binding.clone();
            let args = args.to_vec();
            let log = self.log();
            let open = move || -> Result<PreparedQuery> {
                let lease = ConnectionLease::acquire(datasource.as_ref())?;
                let mut q = PreparedQuery::prepare(lease, &sql, &options, log)?;
                binding.bind(&args, &mut q)?;
                Ok(q)
            };
            return Ok(Output::Stream(stream::lazy(open, conv.clone(), ctx, filter)));
        }

        if filter.is_none() {
            options.max_rows = match action {
                ReadAction::Exists | ReadAction::FindFirst { .. } | ReadAction::Single { .. } => Some(1),
                ReadAction::Unique { .. } => Some(2),
                _ => None,
            };
        }
        let mut rs = self.prepare(&sql, &options, binding, args)?.query()?;
        if let Some(f) = &filter {
            let RowSet { columns, rows } = &mut rs;
            rows.retain(|values| f(Row::new(columns.as_slice(), values.as_slice())));
        }

        let value = match action {
            ReadAction::Exists => Value::Bool(!rs.is_empty()),
            ReadAction::List(conv) => Value::List(convert_all(&ctx, &rs, conv)?),
            ReadAction::Unique { row, .. } => {
                if rs.len() > 1 {
                    return Err(Error::DuplicatedResult(format!(
                        "{} expected at most one row, got {}: {}",
                        self.plan.id,
                        rs.len(),
                        sql.original()
                    )));
                }
                first(&ctx, &rs, row)?
            }
            ReadAction::FindFirst { row, .. } => first(&ctx, &rs, row)?,
            ReadAction::Single { shape, optional } => {
                let v = match rs.rows.first().and_then(|r| r.first()) {
                    Some(v) => coerce(v.clone(), shape)?,
                    None => Value::Null,
                };
                if v.is_null() && !optional {
                    default_of(shape)
                } else {
                    v
                }
            }
            ReadAction::RowSet => return Ok(Output::RowSet(rs)),
            ReadAction::Extract => extract(binding, args, &rs)?,
            ReadAction::Stream(_) => {
                return Err(Error::Invariant("stream reads are opened lazily".into()))
            }
        };
        Ok(Output::Value(value))
    }

    fn write(
        &self,
        query: &QueryDescriptor,
        binding: &ParameterBinding,
        action: &WriteAction,
        args: &[Arg],
    ) -> Result<Output> {
        match action {
            WriteAction::Insert { id } => self.insert_one(query, binding, id, args),
            WriteAction::BatchInsert { id } => self.insert_many(query, binding, id, args),
            WriteAction::Update { count } => {
                let sql = self.sql(query, binding, args)?;
                let n = self.prepare(&sql, &self.options(query), binding, args)?.update()?;
                count_output(n, *count)
            }
            WriteAction::BatchUpdate { count } => {
                let sql = self.sql(query, binding, args)?;
                let items = binding.bulk_items(args)?;
                let done = self
                    .batch(query, &sql, false)
                    .execute(items, |item, q| binding.bind_item(item, q))?;
                count_output(done.total(), *count)
            }
        }
    }

    fn batch<'s>(&'s self, query: &QueryDescriptor, sql: &'s ParsedSql, keys: bool) -> BatchRun<'s> {
        BatchRun {
            datasource: self.env.datasource.as_ref(),
            sql,
            options: StatementOptions {
                return_generated_keys: keys,
                ..self.options(query)
            },
            log: self.log(),
            chunk: query.batch_size,
        }
    }

    /// Entity the inserted item belongs to, when it is the interface entity.
    fn entity_of(&self, item: &Value) -> Option<&EntityDescriptor> {
        let e = self.plan.entity.as_ref()?;
        match item {
            Value::Entity(h) if h.entity_name() == e.name => Some(e),
            Value::Map(_) => Some(e),
            _ => None,
        }
    }

    fn insert_one(
        &self,
        query: &QueryDescriptor,
        binding: &ParameterBinding,
        id: &IdReturn,
        args: &[Arg],
    ) -> Result<Output> {
        let sql = self.sql(query, binding, args)?;
        let options = StatementOptions {
            return_generated_keys: true,
            ..self.options(query)
        };
        let (_, keys) = self.prepare(&sql, &options, binding, args)?.insert()?;
        let key = match binding.shape {
            BindingShape::Structured { arg } => {
                let item = arg_value(args, arg)?;
                inserted_id(item, keys.first(), self.entity_of(item))?
            }
            _ => keys.first().cloned().unwrap_or(Value::Null),
        };
        match id {
            IdReturn::Discard => Ok(Output::Unit),
            ret => Ok(Output::Value(id_value(key, ret)?)),
        }
    }

    fn insert_many(
        &self,
        query: &QueryDescriptor,
        binding: &ParameterBinding,
        id: &IdReturn,
        args: &[Arg],
    ) -> Result<Output> {
        let sql = self.sql(query, binding, args)?;
        let items = binding.bulk_items(args)?;
        let done = self
            .batch(query, &sql, true)
            .execute(items, |item, q| binding.bind_item(item, q))?;
        let generated = done.keys.len() == items.len();
        let mut ids = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let key = if generated { done.keys.get(i) } else { None };
            let key = inserted_id(item, key, self.entity_of(item))?;
            ids.push(key);
        }
        match id {
            IdReturn::Discard => Ok(Output::Unit),
            ret => Ok(Output::Value(Value::List(
                ids.into_iter().map(|v| id_value(v, ret)).collect::<Result<_>>()?,
            ))),
        }
    }

    /// Whether every inserted entity still carries a default id.
    fn ids_unset(&self, binding: &ParameterBinding, args: &[Arg]) -> Result<bool> {
        let Some(e) = self.plan.entity.as_ref() else {
            return Ok(false);
        };
        let [id] = e.id.as_slice() else {
            return Ok(false);
        };
        let unset = |v: &Value| v.member(id).map_or(true, |m| m.is_default());
        Ok(match binding.shape {
            BindingShape::Structured { arg } => unset(arg_value(args, arg)?),
            BindingShape::Bulk { .. } => binding.bulk_items(args)?.iter().all(unset),
            _ => false,
        })
    }

    fn call(
        &self,
        query: &QueryDescriptor,
        binding: &ParameterBinding,
        action: &CallAction,
        args: &[Arg],
    ) -> Result<Output> {
        let sql = self.sql(query, binding, args)?;
        let outcome = self.prepare(&sql, &self.options(query), binding, args)?.call()?;
        let rows = |o: ExecOutcome| match o {
            ExecOutcome::Rows(rs) => rs,
            ExecOutcome::Count(_) => RowSet::new(Vec::new()),
        };
        match action {
            CallAction::Discard => Ok(Output::Unit),
            CallAction::Count(conv) => {
                let n = match outcome {
                    ExecOutcome::Count(n) => n,
                    ExecOutcome::Rows(rs) => rs.len() as u64,
                };
                count_output(n, *conv)
            }
            CallAction::RowSet => Ok(Output::RowSet(rows(outcome))),
            CallAction::List(conv) => {
                let ctx = self.row_context(binding, args)?;
                Ok(Output::Value(Value::List(convert_all(&ctx, &rows(outcome), conv)?)))
            }
            CallAction::Extract => Ok(Output::Value(extract(binding, args, &rows(outcome))?)),
        }
    }
}

fn convert_all(ctx: &RowContext, rs: &RowSet, conv: &RowConversion) -> Result<Vec<Value>> {
    rs.iter().map(|row| ctx.convert(row, conv)).collect()
}

fn first(ctx: &RowContext, rs: &RowSet, conv: &RowConversion) -> Result<Value> {
    match rs.row(0) {
        Some(row) => ctx.convert(row, conv),
        None => Ok(Value::Null),
    }
}

fn extract(binding: &ParameterBinding, args: &[Arg], rs: &RowSet) -> Result<Value> {
    match binding.extractor(args)? {
        Some(f) => f(rs),
        None => Err(Error::Invariant("result extractor argument missing".into())),
    }
}
