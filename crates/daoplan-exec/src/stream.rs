//! Lazy row streams.
//!
//! Nothing touches the database until the first `next()`. The statement
//! stays open while rows are pulled and is closed on exhaustion, on the
//! first error, or when the stream is dropped early.

use daoplan_core::call::{RowFilterFn, RowStream};
use daoplan_core::error::Result;
use daoplan_core::value::{Row, Value};
use daoplan_planner::RowConversion;

use crate::convert::RowContext;
use crate::query::PreparedQuery;

type Opener = Box<dyn FnOnce() -> Result<PreparedQuery> + Send>;

enum State {
    Pending(Opener),
    Open {
        // Keeps the statement open until the stream is done with it.
        _query: PreparedQuery,
        columns: Vec<String>,
        rows: std::vec::IntoIter<Vec<Value>>,
    },
    Done,
}

struct LazyRows {
    state: State,
    conv: RowConversion,
    ctx: RowContext,
    filter: Option<RowFilterFn>,
}

impl LazyRows {
    fn next_row(&mut self) -> Option<Result<Value>> {
        loop {
            match &mut self.state {
                State::Pending(_) => {
                    let State::Pending(open) = std::mem::replace(&mut self.state, State::Done) else {
                        return None;
                    };
                    let opened = open().and_then(|mut q| q.execute_query().map(|rs| (q, rs)));
                    match opened {
                        Ok((query, rs)) => {
                            tracing::trace!(rows = rs.len(), "stream opened");
                            self.state = State::Open {
                                _query: query,
                                columns: rs.columns,
                                rows: rs.rows.into_iter(),
                            };
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
                State::Open { columns, rows, .. } => {
                    let Some(values) = rows.next() else {
                        self.state = State::Done;
                        return None;
                    };
                    let row = Row::new(columns.as_slice(), values.as_slice());
                    if self.filter.as_ref().is_some_and(|f| !f(row)) {
                        continue;
                    }
                    let out = self.ctx.convert(row, &self.conv);
                    if out.is_err() {
                        self.state = State::Done;
                    }
                    return Some(out);
                }
                State::Done => return None,
            }
        }
    }
}

impl Iterator for LazyRows {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}

/// Stream whose query is prepared, bound, and run by `open` on first pull.
pub fn lazy(
    open: impl FnOnce() -> Result<PreparedQuery> + Send + 'static,
    conv: RowConversion,
    ctx: RowContext,
    filter: Option<RowFilterFn>,
) -> RowStream {
    RowStream::new(LazyRows {
        state: State::Pending(Box::new(open)),
        conv,
        ctx,
        filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use daoplan_core::connect::StatementOptions;
    use daoplan_core::naming::NamingPolicy;
    use daoplan_core::shape::TypeShape;
    use daoplan_core::sql::ParsedSql;
    use daoplan_io::memory::{MemoryDataSource, TableDef};
    use daoplan_planner::StatementLog;

    use crate::tx::ConnectionLease;

    fn ds() -> MemoryDataSource {
        let ds = MemoryDataSource::new("stream-test")
            .with_table(TableDef::new("n").column("v"))
            .expect("table");
        for v in 1..=4 {
            ds.insert_row("n", vec![("v", Value::Int(v))]).expect("seed");
        }
        ds
    }

    fn numbers(ds: &MemoryDataSource) -> RowStream {
        let ds = ds.clone();
        lazy(
            move || {
                let sql = ParsedSql::parse("SELECT v FROM n ORDER BY v")?;
                let lease = ConnectionLease::acquire(&ds)?;
                PreparedQuery::prepare(lease, &sql, &StatementOptions::default(), StatementLog::default())
            },
            RowConversion::Scalar(TypeShape::i64()),
            RowContext {
                entity: None,
                naming: NamingPolicy::default(),
                mapper: None,
            },
            None,
        )
    }

    #[test]
    fn nothing_runs_before_the_first_pull() {
        let ds = ds();
        let mut s = numbers(&ds);
        assert_eq!(ds.counters().prepared, 0);
        assert_eq!(s.next().transpose().expect("row"), Some(Value::Int(1)));
        assert_eq!(ds.counters().open_statements, 1);
        drop(s);
        assert_eq!(ds.counters().open_statements, 0);
        assert_eq!(ds.counters().open_connections, 0);
    }

    #[test]
    fn exhaustion_releases_the_statement() {
        let ds = ds();
        let all = numbers(&ds).collect_values().expect("rows");
        assert_eq!(all.len(), 4);
        assert_eq!(ds.counters().open_statements, 0);
    }
}
