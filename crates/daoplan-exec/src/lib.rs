#![forbid(unsafe_code)]
//! daoplan-exec: runtime for compiled DAO plans.
//!
//! Binding turns an `InterfaceProgram` into a dispatch table: each plan is
//! instantiated against a data source and wrapped in its decorators
//! (perf-log, transaction, cache, invalidation, hooks). Calls then run
//! lock-free against that table; statements are released on every path.

pub mod batch;
pub mod cache;
pub mod convert;
pub mod dao;
pub mod hooks;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod registry;
mod runtime;
#[cfg(feature = "async-scheduler")]
pub mod scheduler;
pub mod stream;
pub mod tx;
pub mod typed;

pub use batch::{BatchOutcome, BatchRun};
pub use cache::LocalCache;
pub use dao::{CallHandle, Dao, DaoBuilder};
pub use hooks::{CallContext, Hook, HookRegistry};
pub use pipeline::Invoker;
pub use query::PreparedQuery;
#[cfg(feature = "async-scheduler")]
pub use scheduler::TokioExecutor;
pub use registry::{DaoRegistry, RegistryKey};
pub use tx::{ConnectionLease, Transaction, TxStatus};
pub use typed::{FromOutput, FromValue, Json};

pub use daoplan_core::call::{Arg, Output, RowStream};
pub use daoplan_core::error::{Error, Result};
pub use daoplan_core::value::Value;
