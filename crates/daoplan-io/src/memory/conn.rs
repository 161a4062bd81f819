use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use daoplan_core::connect::{Connection, ExecOutcome, Statement, StatementOptions};
use daoplan_core::error::{Error, Result};
use daoplan_core::value::{RowSet, Value};
use parking_lot::Mutex;

use super::engine::{Applied, Undo};
use super::sql::{self, Expr, Stmt};
use super::{bump, drop_one, Shared};

struct ConnState {
    id: u64,
    /// `Some` while a transaction is open.
    undo: Mutex<Option<Vec<Undo>>>,
    closed: AtomicBool,
}

pub struct MemoryConnection {
    shared: Arc<Shared>,
    state: Arc<ConnState>,
}

impl MemoryConnection {
    pub(crate) fn new(shared: Arc<Shared>, id: u64) -> Self {
        Self {
            shared,
            state: Arc::new(ConnState {
                id,
                undo: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.state.undo.lock().is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(Error::Statement(format!("connection {} is closed", self.state.id)));
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn prepare(&self, sql: &str, options: &StatementOptions) -> Result<Box<dyn Statement>> {
        self.ensure_open()?;
        let (parsed, count) = sql::parse(sql)?;
        bump(&self.shared.counters.prepared);
        bump(&self.shared.counters.open_statements);
        Ok(Box::new(MemoryStatement {
            shared: self.shared.clone(),
            conn: self.state.clone(),
            sql: sql.to_string(),
            parsed,
            params: vec![None; count],
            batch: Vec::new(),
            options: options.clone(),
            keys: Vec::new(),
            closed: false,
        }))
    }

    fn begin(&self) -> Result<()> {
        self.ensure_open()?;
        let mut undo = self.state.undo.lock();
        if undo.is_some() {
            return Err(Error::Transaction(format!(
                "connection {} already has an open transaction",
                self.state.id
            )));
        }
        *undo = Some(Vec::new());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        match self.state.undo.lock().take() {
            Some(_) => {
                bump(&self.shared.counters.commits);
                tracing::trace!(conn = self.state.id, "commit");
                Ok(())
            }
            None => Err(Error::Transaction(format!(
                "commit without a transaction on connection {}",
                self.state.id
            ))),
        }
    }

    fn rollback(&self) -> Result<()> {
        match self.state.undo.lock().take() {
            Some(log) => {
                self.shared.db.lock().revert(log);
                bump(&self.shared.counters.rollbacks);
                tracing::trace!(conn = self.state.id, "rollback");
                Ok(())
            }
            None => Err(Error::Transaction(format!(
                "rollback without a transaction on connection {}",
                self.state.id
            ))),
        }
    }

    fn close(&self) -> Result<()> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(log) = self.state.undo.lock().take() {
            self.shared.db.lock().revert(log);
            bump(&self.shared.counters.rollbacks);
        }
        drop_one(&self.shared.counters.open_connections);
        tracing::trace!(conn = self.state.id, "closed connection");
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub struct MemoryStatement {
    shared: Arc<Shared>,
    conn: Arc<ConnState>,
    sql: String,
    parsed: Stmt,
    params: Vec<Option<Value>>,
    batch: Vec<Vec<Value>>,
    options: StatementOptions,
    keys: Vec<Value>,
    closed: bool,
}

impl MemoryStatement {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Statement(format!("statement is closed: {}", self.sql)));
        }
        if self.conn.closed.load(Ordering::SeqCst) {
            return Err(Error::Statement(format!("connection {} is closed", self.conn.id)));
        }
        Ok(())
    }

    fn bound(&self) -> Result<Vec<Value>> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                p.clone()
                    .ok_or_else(|| Error::Statement(format!("parameter {} is not set: {}", i + 1, self.sql)))
            })
            .collect()
    }

    /// Apply one parameter set and fold its undo records into the
    /// connection's transaction, if any.
    fn apply(&self, params: &[Value]) -> Result<Applied> {
        let mut applied = self
            .shared
            .db
            .lock()
            .apply(&self.parsed, params, self.options.max_rows)?;
        if let Some(log) = self.conn.undo.lock().as_mut() {
            log.append(&mut applied.undo);
        }
        Ok(applied)
    }

    fn call(&self, name: &str, args: &[Expr], params: &[Value]) -> Result<ExecOutcome> {
        let body = self
            .shared
            .procedures
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Statement(format!("no such procedure '{name}'")))?;
        let values: Vec<Value> = args
            .iter()
            .map(|a| match a {
                Expr::Lit(v) => Ok(v.clone()),
                Expr::Param(i) => params
                    .get(*i)
                    .cloned()
                    .ok_or_else(|| Error::Statement(format!("parameter {} is not set", i + 1))),
            })
            .collect::<Result<_>>()?;
        body(&values)
    }

    fn is_query(&self) -> bool {
        matches!(self.parsed, Stmt::Select { .. })
    }
}

impl Statement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }

    fn set(&mut self, index: usize, value: Value) -> Result<()> {
        self.ensure_open()?;
        let count = self.params.len();
        let slot = self.params.get_mut(index).ok_or_else(|| {
            Error::Statement(format!("parameter index {} out of range (statement has {count})", index + 1))
        })?;
        *slot = Some(value);
        Ok(())
    }

    fn clear_parameters(&mut self) {
        self.params.iter_mut().for_each(|p| *p = None);
    }

    fn add_batch(&mut self) -> Result<()> {
        self.ensure_open()?;
        let entry = self.bound()?;
        self.batch.push(entry);
        Ok(())
    }

    fn execute_query(&mut self) -> Result<RowSet> {
        self.ensure_open()?;
        if !self.is_query() {
            return Err(Error::Statement(format!("not a query: {}", self.sql)));
        }
        let params = self.bound()?;
        self.shared.on_execute(&self.sql)?;
        let applied = self.apply(&params)?;
        Ok(applied.rows.unwrap_or_default())
    }

    fn execute_update(&mut self) -> Result<u64> {
        self.ensure_open()?;
        if self.is_query() || matches!(self.parsed, Stmt::Call { .. }) {
            return Err(Error::Statement(format!("not an update: {}", self.sql)));
        }
        let params = self.bound()?;
        self.shared.on_execute(&self.sql)?;
        let applied = self.apply(&params)?;
        self.keys = applied.keys;
        Ok(applied.count)
    }

    fn execute_batch(&mut self) -> Result<Vec<u64>> {
        self.ensure_open()?;
        if self.is_query() || matches!(self.parsed, Stmt::Call { .. }) {
            return Err(Error::Statement(format!("batch requires an update: {}", self.sql)));
        }
        let entries = std::mem::take(&mut self.batch);
        self.shared.counters.batch_sizes.lock().push(entries.len());
        self.shared.on_execute(&self.sql)?;

        let mut counts = Vec::with_capacity(entries.len());
        let mut keys = Vec::new();
        let mut undo = Vec::new();
        for params in &entries {
            let res = self
                .shared
                .db
                .lock()
                .apply(&self.parsed, params, self.options.max_rows);
            match res {
                Ok(mut applied) => {
                    counts.push(applied.count);
                    keys.append(&mut applied.keys);
                    undo.append(&mut applied.undo);
                }
                Err(e) => {
                    // a batch applies all entries or none
                    self.shared.db.lock().revert(undo);
                    return Err(e);
                }
            }
        }
        if let Some(log) = self.conn.undo.lock().as_mut() {
            log.append(&mut undo);
        }
        self.keys = keys;
        Ok(counts)
    }

    fn execute(&mut self) -> Result<ExecOutcome> {
        self.ensure_open()?;
        let params = self.bound()?;
        self.shared.on_execute(&self.sql)?;
        if let Stmt::Call { name, args } = &self.parsed {
            return self.call(name, args, &params);
        }
        let applied = self.apply(&params)?;
        match applied.rows {
            Some(rows) => Ok(ExecOutcome::Rows(rows)),
            None => {
                self.keys = applied.keys;
                Ok(ExecOutcome::Count(applied.count))
            }
        }
    }

    fn generated_keys(&mut self) -> Result<Vec<Value>> {
        if !self.options.return_generated_keys {
            return Err(Error::Statement(format!(
                "statement was not prepared to return generated keys: {}",
                self.sql
            )));
        }
        Ok(std::mem::take(&mut self.keys))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.batch.clear();
            drop_one(&self.shared.counters.open_statements);
        }
        Ok(())
    }
}

impl Drop for MemoryStatement {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
