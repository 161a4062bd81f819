//! Chunked batch execution.
//!
//! Inputs no larger than one chunk run as a single batch on whatever
//! connection the call would use anyway. Larger inputs run chunk by chunk on
//! one statement inside a REQUIRED transaction, so a failing chunk rolls back
//! the ones before it.

use daoplan_core::connect::{DataSource, StatementOptions};
use daoplan_core::error::{Error, Result};
use daoplan_core::sql::ParsedSql;
use daoplan_core::value::Value;
use daoplan_planner::StatementLog;

use crate::query::PreparedQuery;
use crate::tx::{self, ConnectionLease};

/// Per-item update counts plus generated keys, in input order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchOutcome {
    pub counts: Vec<u64>,
    pub keys: Vec<Value>,
}

impl BatchOutcome {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

pub struct BatchRun<'a> {
    pub datasource: &'a dyn DataSource,
    pub sql: &'a ParsedSql,
    pub options: StatementOptions,
    pub log: StatementLog,
    pub chunk: usize,
}

impl BatchRun<'_> {
    pub fn execute(
        &self,
        items: &[Value],
        bind: impl Fn(&Value, &mut PreparedQuery) -> Result<()>,
    ) -> Result<BatchOutcome> {
        if self.chunk == 0 {
            return Err(Error::config("batch size must be positive"));
        }
        if items.is_empty() {
            return Ok(BatchOutcome::default());
        }

        if items.len() <= self.chunk {
            let lease = ConnectionLease::acquire(self.datasource)?;
            let mut q = PreparedQuery::prepare(lease, self.sql, &self.options, self.log)?;
            return self.run_chunk(&mut q, items, &bind);
        }

        let chunks = items.len().div_ceil(self.chunk);
        tracing::debug!(items = items.len(), chunk = self.chunk, chunks, "chunked batch");
        let tx = tx::begin(self.datasource)?;
        let mut out = BatchOutcome::default();
        {
            let lease = ConnectionLease::acquire(self.datasource)?;
            let mut q = PreparedQuery::prepare(lease, self.sql, &self.options, self.log)?;
            for part in items.chunks(self.chunk) {
                let done = self.run_chunk(&mut q, part, &bind)?;
                out.counts.extend(done.counts);
                out.keys.extend(done.keys);
            }
        }
        tx.commit()?;
        Ok(out)
    }

    fn run_chunk(
        &self,
        q: &mut PreparedQuery,
        items: &[Value],
        bind: &impl Fn(&Value, &mut PreparedQuery) -> Result<()>,
    ) -> Result<BatchOutcome> {
        for item in items {
            q.clear_parameters()?;
            bind(item, q)?;
            q.add_batch()?;
        }
        let counts = q.execute_batch()?;
        let keys = if self.options.return_generated_keys {
            q.generated_keys()?
        } else {
            Vec::new()
        };
        Ok(BatchOutcome { counts, keys })
    }
}
