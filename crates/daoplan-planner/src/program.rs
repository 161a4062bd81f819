//! Whole-interface compilation: one plan per method plus the cross-cutting
//! decorators each plan is wrapped in.
//!
//! Decorators are listed innermost first. The exec crate applies them in this
//! order, so hooks always observe the fully decorated call.

use std::collections::BTreeMap;
use std::fmt;

use daoplan_core::config::DaoConfig;
use daoplan_core::decl::{CacheResult, CacheSettings, InterfaceDecl, MethodDecl, Propagation};
use daoplan_core::error::{Error, Result};
use daoplan_core::mapper::SqlLookup;

use crate::compile::{compile_method, MethodPlan};
use crate::crud;

#[derive(Debug, Clone, PartialEq)]
pub enum DecoratorSpec {
    PerfLog { min_operation_ms: u64 },
    Transaction(Propagation),
    Cache(CacheResult),
    /// Clear the interface cache before running the method.
    Invalidate,
    /// Registered hook names, in before-order.
    Hooks(Vec<String>),
}

impl DecoratorSpec {
    pub fn label(&self) -> &'static str {
        match self {
            DecoratorSpec::PerfLog { .. } => "perf-log",
            DecoratorSpec::Transaction(_) => "transaction",
            DecoratorSpec::Cache(_) => "cache",
            DecoratorSpec::Invalidate => "invalidate",
            DecoratorSpec::Hooks(_) => "hooks",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMethod {
    pub decl: MethodDecl,
    pub plan: MethodPlan,
    /// Innermost first.
    pub decorators: Vec<DecoratorSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceProgram {
    pub name: String,
    /// Cache store settings; set when at least one method caches.
    pub cache: Option<CacheSettings>,
    pub methods: BTreeMap<String, CompiledMethod>,
}

impl InterfaceProgram {
    pub fn method(&self, name: &str) -> Option<&CompiledMethod> {
        self.methods.get(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Display for InterfaceProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "interface {} ({} methods)", self.name, self.methods.len())?;
        if let Some(c) = &self.cache {
            writeln!(f, "  cache: capacity={} evict_delay={}ms", c.capacity, c.evict_delay_ms)?;
        }
        for m in self.methods.values() {
            writeln!(f, "  {}", m.plan)?;
            if !m.decorators.is_empty() {
                let labels: Vec<&str> = m.decorators.iter().map(DecoratorSpec::label).collect();
                writeln!(f, "    wrap: {}", labels.join(" > "))?;
            }
        }
        Ok(())
    }
}

/// Compile every method of `interface` into an `InterfaceProgram`.
/// Any configuration problem fails the whole interface.
pub fn compile_interface(
    interface: &InterfaceDecl,
    lookup: Option<&dyn SqlLookup>,
    cfg: &DaoConfig,
) -> Result<InterfaceProgram> {
    let mut seen = std::collections::BTreeSet::new();
    for m in &interface.methods {
        if !seen.insert(m.name.as_str()) {
            return Err(Error::config(format!(
                "interface '{}' declares method '{}' more than once",
                interface.name, m.name
            )));
        }
    }
    crud::validate_entity(interface)?;

    let mut planned: Vec<(MethodDecl, MethodPlan)> = Vec::new();
    for m in &interface.methods {
        let synthesized = m.op.is_none()
            && m.non_db.is_none()
            && interface.crud
            && crud::is_crud_operation(&m.name);
        if synthesized {
            planned.push(crud::synthesize(interface, &m.name, Some(m), cfg)?);
        } else {
            planned.push((m.clone(), compile_method(interface, m, lookup, cfg)?));
        }
    }
    if interface.crud {
        if let Some(entity) = &interface.entity {
            for op in crud::available_operations(entity) {
                if !seen.contains(op) {
                    planned.push(crud::synthesize(interface, op, None, cfg)?);
                }
            }
        }
    }

    let any_cached = planned.iter().any(|(d, _)| d.cache.is_some());
    let any_invalidation =
        interface.refresh_cache.is_some() || planned.iter().any(|(d, _)| d.refresh_cache);
    if any_invalidation && !any_cached {
        return Err(Error::config(format!(
            "interface '{}' declares cache invalidation but no method caches its result",
            interface.name
        )));
    }

    let mut methods = BTreeMap::new();
    for (decl, plan) in planned {
        let decorators = decorators_for(interface, &decl, &plan, cfg)?;
        tracing::debug!(
            method = %plan.id,
            decorators = decorators.len(),
            "assembled method pipeline"
        );
        methods.insert(
            decl.name.clone(),
            CompiledMethod {
                decl,
                plan,
                decorators,
            },
        );
    }

    Ok(InterfaceProgram {
        name: interface.name.clone(),
        cache: any_cached.then(|| interface.cache.clone().unwrap_or_else(|| cfg.cache_settings())),
        methods,
    })
}

fn decorators_for(
    interface: &InterfaceDecl,
    decl: &MethodDecl,
    plan: &MethodPlan,
    cfg: &DaoConfig,
) -> Result<Vec<DecoratorSpec>> {
    let fail = |msg: &str| Error::config(format!("method '{}': {msg}", decl.name));

    if plan.is_non_db() {
        if decl.cache.is_some() || decl.refresh_cache || decl.transactional.is_some() {
            return Err(fail("non-database methods cannot cache, invalidate, or join transactions"));
        }
        return Ok(Vec::new());
    }

    let mut out = Vec::new();

    let min_operation_ms = match decl.perf_log.or(interface.perf_log) {
        Some(p) => Some(p.min_operation_ms),
        None if cfg.min_operation_ms > 0 => Some(cfg.min_operation_ms),
        None => None,
    };
    if let Some(min_operation_ms) = min_operation_ms {
        out.push(DecoratorSpec::PerfLog { min_operation_ms });
    }

    if let Some(p) = decl.transactional.filter(|p| *p != Propagation::Supports) {
        out.push(DecoratorSpec::Transaction(p));
    }

    if let Some(cache) = &decl.cache {
        if plan.is_write() {
            return Err(fail("write operations cannot cache their result"));
        }
        if !plan.returns.is_cacheable() {
            return Err(fail(&format!("a {} result cannot be cached", plan.returns)));
        }
        if decl.params.iter().any(|p| p.shape.is_callback()) {
            return Err(fail("cached methods cannot take callback parameters"));
        }
        if cache.min_size > cache.max_size {
            return Err(fail("cache min size exceeds max size"));
        }
        out.push(DecoratorSpec::Cache(cache.clone()));
    }

    let invalidates = decl.refresh_cache
        || (plan.is_write()
            && interface
                .refresh_cache
                .as_ref()
                .is_some_and(|f| f.matches(&decl.name)));
    if invalidates {
        out.push(DecoratorSpec::Invalidate);
    }

    let mut hooks: Vec<String> = interface
        .hooks
        .iter()
        .filter(|h| h.methods.matches(&decl.name))
        .map(|h| h.name.clone())
        .collect();
    for h in &decl.hooks {
        if !hooks.contains(h) {
            hooks.push(h.clone());
        }
    }
    if !hooks.is_empty() {
        out.push(DecoratorSpec::Hooks(hooks));
    }

    Ok(out)
}
