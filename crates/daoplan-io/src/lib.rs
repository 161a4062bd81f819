#![forbid(unsafe_code)]
//! daoplan-io: data sources behind the `daoplan-core::connect` traits.
//!
//! - `memory`: a small in-process SQL engine (tables, auto-increment keys,
//!   undo-log transactions, stored procedures) with resource counters and
//!   fault injection, used by tests and the CLI's dry runs
//! - `seed`: CSV fixtures loaded into memory tables

pub mod memory;
pub mod seed;

pub use memory::{CounterSnapshot, MemoryDataSource, TableDef};
pub use seed::load_csv;
