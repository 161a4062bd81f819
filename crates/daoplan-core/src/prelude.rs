//! Convenient re-exports for downstream crates.

pub use crate::cache::{CacheStore, CachedValue};
pub use crate::call::{Arg, Output, RowStream};
pub use crate::config::DaoConfig;
pub use crate::connect::{Connection, DataSource, ExecOutcome, Statement, StatementOptions};
pub use crate::decl::{
    CacheResult, CacheSettings, EntityDescriptor, InterfaceDecl, MethodDecl, MethodFilter, NonDb,
    OpTag, OperationKind, ParamDecl, PerfLog, Propagation, PropertyDecl, QueryDescriptor,
    Transfer, Verb,
};
pub use crate::error::{Error, Result};
pub use crate::id::MethodId;
pub use crate::mapper::{SqlEntry, SqlLookup, SqlMapper};
pub use crate::naming::NamingPolicy;
pub use crate::shape::{IntWidth, TypeShape};
pub use crate::sql::ParsedSql;
pub use crate::value::{Record, Row, RowSet, Value};
