#![forbid(unsafe_code)]
//! daoplan: declarative data-access interfaces compiled into executable plans.
//!
//! The workspace crates, re-exported under one roof:
//!     * `daoplan_core`    - declarations, values, collaborator traits, config
//!     * `daoplan_planner` - classification, binding, plan compilation, YAML front end
//!     * `daoplan_exec`    - dispatch tables, transactions, caching, decorators
//!     * `daoplan_io`      - in-memory SQL data source and CSV fixtures

pub use daoplan_core;
pub use daoplan_exec;
pub use daoplan_io;
pub use daoplan_planner;

pub use daoplan_exec::dao_struct;

pub mod prelude {
    pub use daoplan_core::prelude::*;
    pub use daoplan_exec::{CallHandle, Dao, DaoBuilder, DaoRegistry, FromOutput, FromValue, Hook, HookRegistry};
    #[cfg(feature = "async-scheduler")]
    pub use daoplan_exec::TokioExecutor;
    pub use daoplan_io::{load_csv, MemoryDataSource, TableDef};
    pub use daoplan_planner::{compile_interface, parse_dao_yaml, parse_mapper_yaml, DaoFile};
}
