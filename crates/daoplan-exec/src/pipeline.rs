//! Decorator pipeline.
//!
//! Decorators arrive innermost first and are applied in that order, so the
//! last one applied (hooks) sees the fully decorated call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use daoplan_core::cache::{CacheStore, CachedValue};
use daoplan_core::call::{Arg, Output};
use daoplan_core::decl::{CacheResult, Propagation, Transfer};
use daoplan_core::error::{Error, Result};
use daoplan_core::hash::cache_key;
use daoplan_core::id::MethodId;
use daoplan_core::value::{RowSet, Value};
use daoplan_planner::DecoratorSpec;

use crate::hooks::{self, CallContext};
use crate::metrics;
use crate::runtime::Env;
use crate::tx;

/// One entry of a dispatch table.
pub type Invoker = Arc<dyn Fn(&CallContext, &[Arg]) -> Result<Output> + Send + Sync>;

pub(crate) fn decorate(
    base: Invoker,
    specs: &[DecoratorSpec],
    method: &MethodId,
    env: &Arc<Env>,
) -> Result<Invoker> {
    let mut current = base;
    for spec in specs {
        current = match spec {
            DecoratorSpec::PerfLog { min_operation_ms } => perf_log(current, *min_operation_ms),
            DecoratorSpec::Transaction(p) => transactional(current, *p, env),
            DecoratorSpec::Cache(c) => cached(current, c.clone(), store(env, method)?, env),
            DecoratorSpec::Invalidate => invalidating(current, store(env, method)?),
            DecoratorSpec::Hooks(names) => {
                let resolved = env.hooks.resolve(method, names)?;
                let inner = current;
                Arc::new(move |ctx: &CallContext, args: &[Arg]| {
                    hooks::around(&resolved, ctx, args, || inner(ctx, args))
                })
            }
        };
    }
    Ok(current)
}

fn store(env: &Env, method: &MethodId) -> Result<Arc<dyn CacheStore>> {
    env.cache
        .clone()
        .ok_or_else(|| Error::config(format!("method '{method}' needs a cache store")))
}

fn perf_log(inner: Invoker, min_ms: u64) -> Invoker {
    if min_ms == 0 {
        return inner;
    }
    Arc::new(move |ctx: &CallContext, args: &[Arg]| {
        let started = Instant::now();
        let out = inner(ctx, args);
        metrics::log_slow("operation", &ctx.method.to_string(), started.elapsed(), min_ms);
        out
    })
}

fn transactional(inner: Invoker, p: Propagation, env: &Arc<Env>) -> Invoker {
    let env = env.clone();
    Arc::new(move |ctx: &CallContext, args: &[Arg]| {
        let ds = env.datasource.as_ref();
        let tx = match p {
            Propagation::Supports => return inner(ctx, args),
            Propagation::NotSupported => {
                let _hidden = tx::suspend(ds.id());
                return inner(ctx, args);
            }
            Propagation::Required => tx::begin(ds)?,
            // The fresh transaction sits above the ambient one until it ends.
            Propagation::RequiresNew => tx::begin_new(ds)?,
        };
        finish(tx, inner(ctx, args))
    })
}

/// Commit on success; on failure roll back before handing the error on.
fn finish(tx: tx::Transaction, out: Result<Output>) -> Result<Output> {
    match out {
        Ok(v) => {
            tx.commit()?;
            Ok(v)
        }
        Err(e) => match tx.rollback() {
            Ok(()) => Err(e),
            Err(re) => Err(e.with_suppressed(re)),
        },
    }
}

fn invalidating(inner: Invoker, store: Arc<dyn CacheStore>) -> Invoker {
    Arc::new(move |ctx: &CallContext, args: &[Arg]| {
        tracing::trace!(method = %ctx.method, entries = store.len(), "clearing result cache");
        store.clear();
        inner(ctx, args)
    })
}

fn cached(inner: Invoker, cfg: CacheResult, store: Arc<dyn CacheStore>, env: &Env) -> Invoker {
    let live = cfg.live_time_ms.map_or(env.config.live_time(), Duration::from_millis);
    let idle = cfg.idle_time_ms.map_or(env.config.idle_time(), Duration::from_millis);
    let copy = cfg.transfer == Transfer::Copy;
    Arc::new(move |ctx: &CallContext, args: &[Arg]| {
        let values: Vec<&Value> = args.iter().filter_map(Arg::as_value).collect();
        let key = cache_key(&ctx.method.to_string(), &values)?;
        if let Some(hit) = store.get(&key) {
            tracing::trace!(method = %ctx.method, "cache hit");
            return Ok(match hit {
                CachedValue::Value(v) if copy => Output::Value(v.deep_clone()),
                CachedValue::Value(v) => Output::Value(v),
                CachedValue::RowSet(rs) if copy => Output::RowSet(deep_clone_rows(&rs)),
                CachedValue::RowSet(rs) => Output::RowSet(rs),
            });
        }

        let out = inner(ctx, args)?;
        let snapshot = match &out {
            Output::Value(v) if !v.is_null() && fits(&cfg, v.as_list().map(<[Value]>::len)) => {
                Some(CachedValue::Value(if copy { v.deep_clone() } else { v.clone() }))
            }
            Output::RowSet(rs) if fits(&cfg, Some(rs.len())) => Some(CachedValue::RowSet(if copy {
                deep_clone_rows(rs)
            } else {
                rs.clone()
            })),
            _ => None,
        };
        match snapshot {
            Some(s) => {
                let stored = store.put(key, s, live, idle);
                tracing::trace!(method = %ctx.method, stored, "cache miss");
            }
            None => tracing::trace!(method = %ctx.method, "result not cacheable"),
        }
        Ok(out)
    })
}

/// Collections must fall within the declared size bounds; other values fit.
fn fits(cfg: &CacheResult, len: Option<usize>) -> bool {
    len.map_or(true, |n| cfg.min_size <= n && n <= cfg.max_size)
}

fn deep_clone_rows(rs: &RowSet) -> RowSet {
    let mut out = RowSet::new(rs.columns.clone());
    out.rows = rs
        .rows
        .iter()
        .map(|r| r.iter().map(Value::deep_clone).collect())
        .collect();
    out
}
