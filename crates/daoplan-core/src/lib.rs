#![forbid(unsafe_code)]
//! daoplan-core: shared vocabulary for the DAO plan compiler.
//!
//! - `decl`: declarative interface/method metadata (what a DAO method *means*)
//! - `shape`: the reflection-free type model for parameters and return values
//! - `value`/`call`: dynamic values, call arguments, and call outputs
//! - `connect`/`cache`/`mapper`/`executor`: interfaces of external collaborators
//!
//! Nothing in this crate executes SQL. Planning lives in `daoplan-planner` and
//! execution in `daoplan-exec`.

pub mod cache;
pub mod call;
pub mod config;
pub mod connect;
pub mod decl;
pub mod error;
pub mod executor;
pub mod hash;
pub mod id;
pub mod mapper;
pub mod naming;
pub mod prelude;
pub mod shape;
pub mod sql;
pub mod value;

/// Crate version, stamped into explain output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
