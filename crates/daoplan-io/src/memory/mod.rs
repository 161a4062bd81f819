//! In-memory relational data source.
//!
//! Implements the statement layer over a handful of tables held in process.
//! Enough SQL is understood to run everything daoplan generates (CRUD,
//! positional and named queries, IN lists, count, CALL) plus whatever tests
//! write by hand. Writes inside a transaction are recorded in a per-connection
//! undo log; rollback replays it backwards. There is no read isolation.
//!
//! The data source also exposes counters and fault injection so tests can
//! assert on resource usage (open statements, commits, batch sizes) and force
//! a statement to fail.

mod conn;
mod engine;
mod sql;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use daoplan_core::connect::{Connection, DataSource, ExecOutcome};
use daoplan_core::error::{Error, Result};
use daoplan_core::value::{RowSet, Value};
use parking_lot::{Mutex, RwLock};

pub use conn::{MemoryConnection, MemoryStatement};
use engine::{Db, Table};

/// Stored procedure body: receives evaluated CALL arguments.
pub type Procedure = Arc<dyn Fn(&[Value]) -> Result<ExecOutcome> + Send + Sync>;

/// Schema of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: String,
    columns: Vec<String>,
    key: Option<String>,
    auto_increment: bool,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            columns: Vec::new(),
            key: None,
            auto_increment: false,
        }
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        let name = name.into().to_ascii_lowercase();
        if !self.columns.contains(&name) {
            self.columns.push(name);
        }
        self
    }

    pub fn columns(self, names: &[&str]) -> Self {
        names.iter().fold(self, |t, c| t.column(*c))
    }

    /// Unique key column. Duplicate values fail the statement.
    pub fn key(mut self, column: impl Into<String>) -> Self {
        let column = column.into().to_ascii_lowercase();
        self.key = Some(column.clone());
        self.column(column)
    }

    /// Key column whose value is generated when omitted, NULL, or zero.
    pub fn auto_increment(mut self, column: impl Into<String>) -> Self {
        self.auto_increment = true;
        self.key(column)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Point-in-time copy of the data source counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub open_connections: u64,
    pub open_statements: u64,
    pub prepared: u64,
    pub executions: u64,
    pub commits: u64,
    pub rollbacks: u64,
    /// Entry count of every `execute_batch`, in order.
    pub batch_sizes: Vec<usize>,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub open_connections: AtomicU64,
    pub open_statements: AtomicU64,
    pub prepared: AtomicU64,
    pub executions: AtomicU64,
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
    pub batch_sizes: Mutex<Vec<usize>>,
}

pub(crate) fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn drop_one(c: &AtomicU64) {
    let _ = c.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

struct Fault {
    sql_contains: String,
    remaining: usize,
}

pub(crate) struct Shared {
    pub id: String,
    pub db: Mutex<Db>,
    pub counters: Counters,
    faults: Mutex<Vec<Fault>>,
    pub procedures: RwLock<HashMap<String, Procedure>>,
    pub executed: Mutex<Vec<String>>,
    next_conn: AtomicU64,
}

impl Shared {
    /// Record one execution of `sql`; fails when an armed fault triggers.
    pub fn on_execute(&self, sql: &str) -> Result<()> {
        bump(&self.counters.executions);
        self.executed.lock().push(sql.to_string());

        let mut faults = self.faults.lock();
        let mut fired = None;
        for (i, f) in faults.iter_mut().enumerate() {
            if sql.contains(&f.sql_contains) {
                f.remaining -= 1;
                if f.remaining == 0 {
                    fired = Some(i);
                    break;
                }
            }
        }
        if let Some(i) = fired {
            let f = faults.remove(i);
            tracing::debug!(datasource = %self.id, pattern = %f.sql_contains, "injected statement failure");
            return Err(Error::Statement(format!("injected failure executing: {sql}")));
        }
        Ok(())
    }
}

/// Cheap to clone; clones share the same tables.
#[derive(Clone)]
pub struct MemoryDataSource {
    shared: Arc<Shared>,
}

impl MemoryDataSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: id.into(),
                db: Mutex::new(Db::default()),
                counters: Counters::default(),
                faults: Mutex::new(Vec::new()),
                procedures: RwLock::new(HashMap::new()),
                executed: Mutex::new(Vec::new()),
                next_conn: AtomicU64::new(1),
            }),
        }
    }

    pub fn with_table(self, def: TableDef) -> Result<Self> {
        self.create_table(def)?;
        Ok(self)
    }

    pub fn create_table(&self, def: TableDef) -> Result<()> {
        if def.columns.is_empty() {
            return Err(Error::config(format!("table '{}' has no columns", def.name)));
        }
        let mut db = self.shared.db.lock();
        if db.tables.contains_key(&def.name) {
            return Err(Error::Statement(format!("table '{}' already exists", def.name)));
        }
        tracing::debug!(datasource = %self.shared.id, table = %def.name, "created table");
        db.tables.insert(
            def.name,
            Table {
                columns: def.columns,
                key: def.key,
                auto_increment: def.auto_increment,
                next_id: 1,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Insert one row outside of any connection. Used for fixtures.
    pub fn insert_row(&self, table: &str, values: Vec<(&str, Value)>) -> Result<()> {
        let columns: Vec<String> = values.iter().map(|(c, _)| c.to_ascii_lowercase()).collect();
        let params: Vec<Value> = values.into_iter().map(|(_, v)| v).collect();
        let stmt = sql::Stmt::Insert {
            table: table.to_ascii_lowercase(),
            columns,
            rows: vec![(0..params.len()).map(sql::Expr::Param).collect()],
        };
        self.shared.db.lock().apply(&stmt, &params, None)?;
        Ok(())
    }

    pub fn register_procedure(
        &self,
        name: &str,
        body: impl Fn(&[Value]) -> Result<ExecOutcome> + Send + Sync + 'static,
    ) {
        self.shared
            .procedures
            .write()
            .insert(name.to_ascii_lowercase(), Arc::new(body));
    }

    /// Arm a failure: the `nth` (1-based) execution whose SQL contains
    /// `sql_contains` returns a statement error. A batch counts once.
    pub fn fail_nth_execution(&self, nth: usize, sql_contains: &str) {
        self.shared.faults.lock().push(Fault {
            sql_contains: sql_contains.to_string(),
            remaining: nth.max(1),
        });
    }

    /// Table contents in insertion order, every column selected.
    pub fn rows(&self, table: &str) -> Result<RowSet> {
        let db = self.shared.db.lock();
        let t = db
            .tables
            .get(&table.to_ascii_lowercase())
            .ok_or_else(|| Error::Statement(format!("no such table '{table}'")))?;
        let mut rs = RowSet::new(t.columns.clone());
        for r in &t.rows {
            rs.rows.push(
                t.columns
                    .iter()
                    .map(|c| r.values.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }
        Ok(rs)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.shared
            .db
            .lock()
            .tables
            .get(&table.to_ascii_lowercase())
            .map_or(0, |t| t.rows.len())
    }

    pub fn counters(&self) -> CounterSnapshot {
        let c = &self.shared.counters;
        CounterSnapshot {
            open_connections: c.open_connections.load(Ordering::SeqCst),
            open_statements: c.open_statements.load(Ordering::SeqCst),
            prepared: c.prepared.load(Ordering::SeqCst),
            executions: c.executions.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
            batch_sizes: c.batch_sizes.lock().clone(),
        }
    }

    /// SQL text of every execution so far.
    pub fn executed_sql(&self) -> Vec<String> {
        self.shared.executed.lock().clone()
    }
}

impl std::fmt::Debug for MemoryDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDataSource")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

impl DataSource for MemoryDataSource {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn connect(&self) -> Result<Arc<dyn Connection>> {
        let id = self.shared.next_conn.fetch_add(1, Ordering::SeqCst);
        bump(&self.shared.counters.open_connections);
        tracing::trace!(datasource = %self.shared.id, conn = id, "opened connection");
        Ok(Arc::new(MemoryConnection::new(self.shared.clone(), id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daoplan_core::connect::StatementOptions;

    fn accounts() -> MemoryDataSource {
        MemoryDataSource::new("mem")
            .with_table(
                TableDef::new("account")
                    .auto_increment("id")
                    .columns(&["first_name", "age"]),
            )
            .expect("table")
    }

    fn run(conn: &Arc<dyn Connection>, sql: &str, params: Vec<Value>) -> Result<u64> {
        let mut st = conn.prepare(sql, &StatementOptions::default())?;
        for (i, p) in params.into_iter().enumerate() {
            st.set(i, p)?;
        }
        let n = st.execute_update();
        st.close()?;
        n
    }

    #[test]
    fn auto_increment_assigns_keys_and_respects_explicit_ones() {
        let ds = accounts();
        let conn = ds.connect().expect("conn");
        let mut st = conn
            .prepare(
                "INSERT INTO account (first_name) VALUES (?)",
                &StatementOptions {
                    return_generated_keys: true,
                    ..StatementOptions::default()
                },
            )
            .expect("prepare");
        st.set(0, Value::from("ada")).expect("set");
        assert_eq!(st.execute_update().expect("insert"), 1);
        assert_eq!(st.generated_keys().expect("keys"), vec![Value::Int(1)]);
        st.close().expect("close");

        run(&conn, "INSERT INTO account (id, first_name) VALUES (?, ?)", vec![10.into(), "bob".into()])
            .expect("explicit");
        run(&conn, "INSERT INTO account (first_name) VALUES ('cy')", vec![]).expect("next");
        let ids: Vec<Value> = ds.rows("account").expect("rows").rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(10), Value::Int(11)]);

        let dup = run(&conn, "INSERT INTO account (id, first_name) VALUES (10, 'x')", vec![]);
        assert!(matches!(dup, Err(Error::Statement(_))));
        assert_eq!(ds.row_count("account"), 3);
        conn.close().expect("close");
        assert_eq!(ds.counters().open_statements, 0);
        assert_eq!(ds.counters().open_connections, 0);
    }

    #[test]
    fn rollback_replays_the_undo_log() {
        let ds = accounts();
        ds.insert_row("account", vec![("first_name", "keep".into())]).expect("seed");
        let conn = ds.connect().expect("conn");
        conn.begin().expect("begin");
        run(&conn, "INSERT INTO account (first_name) VALUES ('tmp')", vec![]).expect("insert");
        run(&conn, "UPDATE account SET age = 40 WHERE first_name = 'keep'", vec![]).expect("update");
        run(&conn, "DELETE FROM account WHERE first_name = ?", vec!["keep".into()]).expect("delete");
        assert_eq!(ds.row_count("account"), 1);
        conn.rollback().expect("rollback");

        let rows = ds.rows("account").expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.rows[0][1], Value::from("keep"));
        assert_eq!(rows.rows[0][2], Value::Null);
        assert!(conn.commit().is_err());
        assert_eq!(ds.counters().rollbacks, 1);
    }

    #[test]
    fn injected_failures_hit_the_nth_matching_execution() {
        let ds = accounts();
        ds.fail_nth_execution(2, "INSERT");
        let conn = ds.connect().expect("conn");
        run(&conn, "INSERT INTO account (first_name) VALUES ('a')", vec![]).expect("first");
        run(&conn, "SELECT * FROM account", vec![]).expect_err("select is not an update");
        let err = run(&conn, "INSERT INTO account (first_name) VALUES ('b')", vec![]).unwrap_err();
        assert!(err.to_string().contains("injected"));
        run(&conn, "INSERT INTO account (first_name) VALUES ('c')", vec![]).expect("disarmed");
        assert_eq!(ds.row_count("account"), 2);
    }

    #[test]
    fn procedures_receive_evaluated_arguments() {
        let ds = accounts();
        ds.register_procedure("double_it", |args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(ExecOutcome::Count((n * 2) as u64))
        });
        let conn = ds.connect().expect("conn");
        let mut st = conn.prepare("CALL double_it(?)", &StatementOptions::default()).expect("prepare");
        st.set(0, Value::Int(21)).expect("set");
        assert_eq!(st.execute().expect("call"), ExecOutcome::Count(42));
    }
}
