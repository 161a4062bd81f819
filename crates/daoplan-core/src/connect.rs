//! Interfaces of the low-level query execution layer.
//!
//! daoplan never talks to a database directly. A `DataSource` hands out
//! connections; a connection prepares `Statement`s. Statements are owned by
//! exactly one call and must be closed after use.

use std::sync::Arc;

use crate::error::Result;
use crate::value::{RowSet, Value};

/// Execution options applied when a statement is prepared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementOptions {
    pub fetch_size: Option<u32>,
    pub query_timeout: Option<u32>,
    pub max_rows: Option<u64>,
    pub return_generated_keys: bool,
}

/// Result of a statement whose shape is not known in advance (e.g. CALL).
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Rows(RowSet),
    Count(u64),
}

/// A prepared, parameterized statement. Indices are zero-based.
pub trait Statement: Send {
    fn sql(&self) -> &str;

    fn parameter_count(&self) -> usize;

    fn set(&mut self, index: usize, value: Value) -> Result<()>;

    fn clear_parameters(&mut self);

    /// Snapshot current parameters as one batch entry.
    fn add_batch(&mut self) -> Result<()>;

    fn execute_query(&mut self) -> Result<RowSet>;

    fn execute_update(&mut self) -> Result<u64>;

    /// Runs every accumulated batch entry; one count per entry.
    fn execute_batch(&mut self) -> Result<Vec<u64>>;

    fn execute(&mut self) -> Result<ExecOutcome>;

    /// Keys generated by the last update/batch, in input order.
    fn generated_keys(&mut self) -> Result<Vec<Value>>;

    fn close(&mut self) -> Result<()>;
}

/// One database session. Shared (via `Arc`) by every statement running inside
/// the same transaction.
pub trait Connection: Send + Sync {
    fn prepare(&self, sql: &str, options: &StatementOptions) -> Result<Box<dyn Statement>>;

    /// Leave auto-commit mode.
    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

pub trait DataSource: Send + Sync {
    /// Stable identity; keys ambient transactions and dispatch tables.
    fn id(&self) -> &str;

    fn connect(&self) -> Result<Arc<dyn Connection>>;
}
