//! Prepared query: one statement owned by one call.
//!
//! The statement is closed when the query is dropped, so every exit path
//! (success, error, abandoned stream) releases it. One-shot helpers consume
//! the query; batch helpers borrow it so a statement can stay open across
//! chunks.

use std::time::Instant;

use daoplan_core::connect::{ExecOutcome, Statement, StatementOptions};
use daoplan_core::error::{Error, Result};
use daoplan_core::sql::ParsedSql;
use daoplan_core::value::{RowSet, Value};
use daoplan_planner::{ParamTarget, StatementLog};

use crate::metrics;
use crate::tx::ConnectionLease;

pub struct PreparedQuery {
    stmt: Option<Box<dyn Statement>>,
    names: Vec<String>,
    log: StatementLog,
    // Declared last: the statement closes before the connection is released.
    _lease: ConnectionLease,
}

impl PreparedQuery {
    pub fn prepare(
        lease: ConnectionLease,
        sql: &ParsedSql,
        options: &StatementOptions,
        log: StatementLog,
    ) -> Result<Self> {
        let stmt = lease.connection().prepare(sql.positional(), options)?;
        Ok(Self {
            stmt: Some(stmt),
            names: sql.names().to_vec(),
            log,
            _lease: lease,
        })
    }

    fn stmt(&mut self) -> Result<&mut Box<dyn Statement>> {
        self.stmt
            .as_mut()
            .ok_or_else(|| Error::Statement("query was already closed".into()))
    }

    pub fn sql(&self) -> &str {
        self.stmt.as_ref().map_or("", |s| s.sql())
    }

    pub fn parameter_count(&self) -> usize {
        self.stmt.as_ref().map_or(0, |s| s.parameter_count())
    }

    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.stmt()?.set(index, value.into())
    }

    pub fn set_null(&mut self, index: usize) -> Result<()> {
        self.set(index, Value::Null)
    }

    /// Bind `value` to every occurrence of `name`. An unknown name closes the
    /// statement and fails with `ParameterNotFound`.
    pub fn set_named(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let positions: Vec<usize> = self
            .names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.as_str() == name)
            .map(|(i, _)| i)
            .collect();
        if positions.is_empty() {
            let err = Error::ParameterNotFound(format!("'{name}' does not occur in: {}", self.sql()));
            self.close();
            return Err(err);
        }
        let stmt = self.stmt()?;
        for pos in positions {
            stmt.set(pos, value.clone())?;
        }
        Ok(())
    }

    pub fn set_null_named(&mut self, name: &str) -> Result<()> {
        self.set_named(name, Value::Null)
    }

    pub fn clear_parameters(&mut self) -> Result<()> {
        self.stmt()?.clear_parameters();
        Ok(())
    }

    pub fn add_batch(&mut self) -> Result<()> {
        self.stmt()?.add_batch()
    }

    fn timed<T>(&mut self, op: impl FnOnce(&mut dyn Statement) -> Result<T>) -> Result<T> {
        let log = self.log;
        let stmt = self.stmt()?;
        if log.sql {
            tracing::trace!(sql = %stmt.sql(), "executing statement");
        }
        let started = Instant::now();
        let res = op(stmt.as_mut());
        if log.min_sql_ms > 0 {
            metrics::log_slow("sql", stmt.sql(), started.elapsed(), log.min_sql_ms);
        }
        res
    }

    /// Run the query, keeping the statement open (used by lazy streams).
    pub fn execute_query(&mut self) -> Result<RowSet> {
        self.timed(|s| s.execute_query())
    }

    pub fn execute_batch(&mut self) -> Result<Vec<u64>> {
        self.timed(|s| s.execute_batch())
    }

    pub fn generated_keys(&mut self) -> Result<Vec<Value>> {
        self.stmt()?.generated_keys()
    }

    pub fn query(mut self) -> Result<RowSet> {
        self.execute_query()
    }

    /// Alias of `query` for list-shaped reads.
    pub fn list(self) -> Result<RowSet> {
        self.query()
    }

    pub fn exists(self) -> Result<bool> {
        Ok(!self.query()?.is_empty())
    }

    /// First row (if any) as a one-row set.
    pub fn find_first(self) -> Result<RowSet> {
        let mut rs = self.query()?;
        rs.rows.truncate(1);
        Ok(rs)
    }

    /// At most one row; more is a `DuplicatedResult` error.
    pub fn find_only_one(self) -> Result<RowSet> {
        let sql = self.sql().to_string();
        let rs = self.query()?;
        if rs.len() > 1 {
            return Err(Error::DuplicatedResult(format!(
                "at least two rows returned by: {sql}"
            )));
        }
        Ok(rs)
    }

    /// First column of the first row; `None` when there is no row.
    pub fn query_for_single(self) -> Result<Option<Value>> {
        Ok(self.query()?.rows.into_iter().next().and_then(|r| r.into_iter().next()))
    }

    pub fn update(mut self) -> Result<u64> {
        self.timed(|s| s.execute_update())
    }

    /// Affected rows plus generated keys. Prepare with
    /// `return_generated_keys` set.
    pub fn insert(mut self) -> Result<(u64, Vec<Value>)> {
        let count = self.timed(|s| s.execute_update())?;
        let keys = self.generated_keys()?;
        Ok((count, keys))
    }

    pub fn batch_update(mut self) -> Result<Vec<u64>> {
        self.execute_batch()
    }

    pub fn call(mut self) -> Result<ExecOutcome> {
        self.timed(|s| s.execute())
    }

    fn close(&mut self) {
        if let Some(mut stmt) = self.stmt.take() {
            if let Err(e) = stmt.close() {
                tracing::warn!(error = %e, "closing statement failed");
            }
        }
    }
}

impl ParamTarget for PreparedQuery {
    fn set(&mut self, index: usize, value: Value) -> Result<()> {
        PreparedQuery::set(self, index, value)
    }

    fn set_named(&mut self, name: &str, value: Value) -> Result<()> {
        PreparedQuery::set_named(self, name, value)
    }
}

impl Drop for PreparedQuery {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PreparedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedQuery").field("sql", &self.sql()).finish()
    }
}
