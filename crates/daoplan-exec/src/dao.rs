//! Bound data-access interfaces.
//!
//! `DaoBuilder::bind` compiles an interface declaration against one data
//! source and produces a `Dao`: a read-only table of fully decorated
//! callables keyed by method name. Dispatch takes no locks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{mpsc, Arc};

use daoplan_core::cache::CacheStore;
use daoplan_core::call::{Arg, Output};
use daoplan_core::config::DaoConfig;
use daoplan_core::connect::DataSource;
use daoplan_core::decl::InterfaceDecl;
use daoplan_core::error::{Error, Result};
use daoplan_core::executor::{Executor, ThreadExecutor};
use daoplan_core::id::MethodId;
use daoplan_core::mapper::SqlLookup;
use daoplan_planner::{compile_interface, InterfaceProgram};

use crate::cache::LocalCache;
use crate::hooks::{CallContext, Hook, HookRegistry};
use crate::pipeline::{self, Invoker};
use crate::runtime::{self, Env};
use crate::tx::{self, Transaction};

struct Entry {
    ctx: CallContext,
    invoker: Invoker,
}

pub struct Dao {
    program: InterfaceProgram,
    datasource: Arc<dyn DataSource>,
    executor: Arc<dyn Executor>,
    cache: Option<Arc<dyn CacheStore>>,
    table: BTreeMap<String, Entry>,
}

impl Dao {
    pub fn builder(decl: InterfaceDecl) -> DaoBuilder {
        DaoBuilder::new(decl)
    }

    pub fn name(&self) -> &str {
        &self.program.name
    }

    pub fn program(&self) -> &InterfaceProgram {
        &self.program
    }

    pub fn datasource_id(&self) -> &str {
        self.datasource.id()
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Result cache shared by the interface's methods, when any method caches.
    pub fn cache_store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    fn entry(&self, method: &str) -> Result<&Entry> {
        self.table.get(method).ok_or_else(|| {
            Error::Invariant(format!("interface '{}' has no method '{method}'", self.name()))
        })
    }

    /// Invoke `method` on the calling thread. Ambient transactions of this
    /// thread apply.
    pub fn call(&self, method: &str, args: &[Arg]) -> Result<Output> {
        let entry = self.entry(method)?;
        tracing::trace!(method = %entry.ctx.method, args = args.len(), "dispatch");
        (entry.invoker)(&entry.ctx, args)
    }

    /// Invoke `method` on the interface's executor. The call starts with no
    /// ambient transaction.
    pub fn call_async(&self, method: &str, args: Vec<Arg>) -> Result<CallHandle> {
        let entry = self.entry(method)?;
        let (tx, rx) = mpsc::channel();
        let invoker = entry.invoker.clone();
        let ctx = entry.ctx.clone();
        self.executor.execute(Box::new(move || {
            let out = invoker(&ctx, &args);
            // The caller may have dropped its handle.
            let _ = tx.send(out);
        }));
        Ok(CallHandle {
            method: entry.ctx.method.clone(),
            rx,
        })
    }

    /// Begin (or join) a transaction on this interface's data source.
    pub fn begin_transaction(&self) -> Result<Transaction> {
        tx::begin(self.datasource.as_ref())
    }

    /// Begin a transaction isolated from any ambient one.
    pub fn begin_new_transaction(&self) -> Result<Transaction> {
        tx::begin_new(self.datasource.as_ref())
    }
}

impl fmt::Debug for Dao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dao")
            .field("interface", &self.program.name)
            .field("datasource", &self.datasource.id())
            .field("executor", &self.executor.name())
            .field("methods", &self.table.len())
            .finish()
    }
}

/// Pending result of `Dao::call_async`.
pub struct CallHandle {
    method: MethodId,
    rx: mpsc::Receiver<Result<Output>>,
}

impl CallHandle {
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    /// Block until the call finishes. A worker that died without answering
    /// yields `Cancelled`.
    pub fn join(self) -> Result<Output> {
        match self.rx.recv() {
            Ok(out) => out,
            Err(_) => Err(Error::Cancelled(format!(
                "{} ended without producing a result",
                self.method
            ))),
        }
    }

    /// The result, if the call has already finished.
    pub fn try_join(&self) -> Option<Result<Output>> {
        match self.rx.try_recv() {
            Ok(out) => Some(out),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(Error::Cancelled(format!(
                "{} ended without producing a result",
                self.method
            )))),
        }
    }
}

pub struct DaoBuilder {
    decl: InterfaceDecl,
    datasource: Option<Arc<dyn DataSource>>,
    mapper: Option<Arc<dyn SqlLookup>>,
    executor: Arc<dyn Executor>,
    hooks: HookRegistry,
    cache: Option<Arc<dyn CacheStore>>,
    config: DaoConfig,
}

impl DaoBuilder {
    pub fn new(decl: InterfaceDecl) -> Self {
        Self {
            decl,
            datasource: None,
            mapper: None,
            executor: Arc::new(ThreadExecutor),
            hooks: HookRegistry::new(),
            cache: None,
            config: DaoConfig::default(),
        }
    }

    pub fn data_source(mut self, ds: Arc<dyn DataSource>) -> Self {
        self.datasource = Some(ds);
        self
    }

    pub fn mapper(mut self, mapper: Arc<dyn SqlLookup>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn hook(mut self, name: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
        self.hooks.register(name, hook);
        self
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use `store` instead of a private `LocalCache`.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn config(mut self, config: DaoConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn interface(&self) -> &InterfaceDecl {
        &self.decl
    }

    pub(crate) fn datasource_ref(&self) -> Option<&Arc<dyn DataSource>> {
        self.datasource.as_ref()
    }

    pub(crate) fn mapper_ref(&self) -> Option<&Arc<dyn SqlLookup>> {
        self.mapper.as_ref()
    }

    pub(crate) fn executor_ref(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Compile every method and build the dispatch table. Any configuration
    /// problem fails the whole bind.
    pub fn bind(self) -> Result<Dao> {
        let datasource = self.datasource.ok_or_else(|| {
            Error::config(format!("interface '{}' has no data source", self.decl.name))
        })?;
        let program = compile_interface(&self.decl, self.mapper.as_deref(), &self.config)?;

        let cache = match (self.cache, &program.cache) {
            (Some(store), _) => Some(store),
            (None, Some(settings)) => {
                Some(Arc::new(LocalCache::from_settings(settings)) as Arc<dyn CacheStore>)
            }
            (None, None) => None,
        };
        let env = Arc::new(Env {
            datasource: datasource.clone(),
            config: self.config,
            cache: cache.clone(),
            hooks: self.hooks,
        });

        let mut table = BTreeMap::new();
        for (name, m) in &program.methods {
            let base = runtime::instantiate(&m.plan, &env)?;
            let invoker = pipeline::decorate(base, &m.decorators, &m.plan.id, &env)?;
            let ctx = CallContext {
                method: m.plan.id.clone(),
                datasource_id: datasource.id().to_string(),
            };
            table.insert(name.clone(), Entry { ctx, invoker });
        }
        tracing::debug!(
            interface = %program.name,
            datasource = %datasource.id(),
            methods = table.len(),
            cached = cache.is_some(),
            "bound interface"
        );

        Ok(Dao {
            program,
            datasource,
            executor: self.executor,
            cache,
            table,
        })
    }
}
