//! Ambient transactions.
//!
//! Each thread keeps one stack per data source id. The top entry is the
//! ambient transaction that statements on that data source join; a `None`
//! entry hides everything below it (NOT_SUPPORTED, or a suspended outer
//! transaction while a REQUIRES_NEW one runs above it).
//!
//! Transactions never cross threads: `Transaction` is `!Send`, and async
//! calls start with no ambient transaction.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use daoplan_core::connect::{Connection, DataSource};
use daoplan_core::error::{Error, Result};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Active,
    /// A joined participant rolled back; the owner can only roll back.
    RollbackOnly,
    Committed,
    RolledBack,
}

pub(crate) struct TxInner {
    id: Uuid,
    datasource: String,
    conn: Arc<dyn Connection>,
    status: Mutex<TxStatus>,
}

impl TxInner {
    fn is_open(&self) -> bool {
        matches!(*self.status.lock(), TxStatus::Active | TxStatus::RollbackOnly)
    }
}

thread_local! {
    static AMBIENT: RefCell<HashMap<String, Vec<Option<Arc<TxInner>>>>> = RefCell::new(HashMap::new());
}

fn push(ds: &str, entry: Option<Arc<TxInner>>) {
    AMBIENT.with(|a| a.borrow_mut().entry(ds.to_string()).or_default().push(entry));
}

/// Remove the topmost entry matching `which` (`None` = a suspension marker).
fn pop(ds: &str, which: Option<&Arc<TxInner>>) {
    AMBIENT.with(|a| {
        let mut map = a.borrow_mut();
        if let Some(stack) = map.get_mut(ds) {
            let pos = stack.iter().rposition(|e| match (e, which) {
                (Some(x), Some(y)) => Arc::ptr_eq(x, y),
                (None, None) => true,
                _ => false,
            });
            if let Some(pos) = pos {
                stack.remove(pos);
            }
            if stack.is_empty() {
                map.remove(ds);
            }
        }
    });
}

pub(crate) fn current(ds: &str) -> Option<Arc<TxInner>> {
    AMBIENT.with(|a| {
        a.borrow()
            .get(ds)
            .and_then(|stack| stack.last().cloned().flatten())
            .filter(|tx| tx.is_open())
    })
}

/// True when statements on `ds` would join a transaction on this thread.
pub fn in_transaction(ds: &str) -> bool {
    current(ds).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Owner,
    Joined,
}

/// Handle to an ambient transaction. Dropping it without `commit` rolls back
/// (an owner) or marks the transaction rollback-only (a participant).
pub struct Transaction {
    inner: Arc<TxInner>,
    role: Role,
    finished: bool,
    _not_send: PhantomData<Rc<()>>,
}

impl Transaction {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn status(&self) -> TxStatus {
        *self.inner.status.lock()
    }

    /// Whether this handle began the transaction (as opposed to joining it).
    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if self.role == Role::Joined {
            return Ok(());
        }
        let status = self.status();
        if status == TxStatus::RollbackOnly {
            self.finish_rollback()?;
            return Err(Error::Transaction(format!(
                "transaction {} was marked rollback-only and has been rolled back",
                self.inner.id
            )));
        }
        pop(&self.inner.datasource, Some(&self.inner));
        let res = self.inner.conn.commit();
        let closed = self.inner.conn.close();
        match res {
            Ok(()) => {
                *self.inner.status.lock() = TxStatus::Committed;
                tracing::debug!(tx = %self.inner.id, datasource = %self.inner.datasource, "committed transaction");
                closed
            }
            Err(e) => {
                *self.inner.status.lock() = TxStatus::RolledBack;
                Err(e)
            }
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.rollback_inner()
    }

    fn rollback_inner(&mut self) -> Result<()> {
        match self.role {
            Role::Joined => {
                let mut status = self.inner.status.lock();
                if *status == TxStatus::Active {
                    *status = TxStatus::RollbackOnly;
                    tracing::debug!(tx = %self.inner.id, "marked transaction rollback-only");
                }
                Ok(())
            }
            Role::Owner => self.finish_rollback(),
        }
    }

    fn finish_rollback(&mut self) -> Result<()> {
        pop(&self.inner.datasource, Some(&self.inner));
        *self.inner.status.lock() = TxStatus::RolledBack;
        let res = self.inner.conn.rollback();
        let closed = self.inner.conn.close();
        tracing::debug!(tx = %self.inner.id, datasource = %self.inner.datasource, "rolled back transaction");
        match (res, closed) {
            (Err(e), Err(closing)) => Err(e.with_suppressed(closing)),
            (res, closed) => res.and(closed),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.rollback_inner() {
                tracing::warn!(tx = %self.inner.id, error = %e, "rollback on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("role", &self.role)
            .field("status", &self.status())
            .finish()
    }
}

fn start(ds: &dyn DataSource) -> Result<Transaction> {
    let conn = ds.connect()?;
    if let Err(e) = conn.begin() {
        return Err(match conn.close() {
            Ok(()) => e,
            Err(closing) => e.with_suppressed(closing),
        });
    }
    let inner = Arc::new(TxInner {
        id: Uuid::new_v4(),
        datasource: ds.id().to_string(),
        conn,
        status: Mutex::new(TxStatus::Active),
    });
    push(ds.id(), Some(inner.clone()));
    tracing::debug!(tx = %inner.id, datasource = %ds.id(), "began transaction");
    Ok(Transaction {
        inner,
        role: Role::Owner,
        finished: false,
        _not_send: PhantomData,
    })
}

/// REQUIRED: join the ambient transaction on `ds`, or begin one.
pub fn begin(ds: &dyn DataSource) -> Result<Transaction> {
    match current(ds.id()) {
        Some(inner) => Ok(Transaction {
            inner,
            role: Role::Joined,
            finished: false,
            _not_send: PhantomData,
        }),
        None => start(ds),
    }
}

/// REQUIRES_NEW: begin a fresh transaction on its own connection. Any ambient
/// transaction stays suspended until the new one finishes.
pub fn begin_new(ds: &dyn DataSource) -> Result<Transaction> {
    start(ds)
}

/// Hides every ambient transaction on one data source while alive.
pub struct Suspended {
    datasource: String,
    _not_send: PhantomData<Rc<()>>,
}

/// NOT_SUPPORTED: run with no ambient transaction visible.
pub fn suspend(ds: &str) -> Suspended {
    push(ds, None);
    Suspended {
        datasource: ds.to_string(),
        _not_send: PhantomData,
    }
}

impl Drop for Suspended {
    fn drop(&mut self) {
        pop(&self.datasource, None);
    }
}

/// Connection for one statement: the ambient transaction's connection when
/// there is one, otherwise a private auto-commit connection closed on drop.
pub struct ConnectionLease {
    conn: Arc<dyn Connection>,
    owned: bool,
}

impl ConnectionLease {
    pub fn acquire(ds: &dyn DataSource) -> Result<Self> {
        match current(ds.id()) {
            Some(tx) => Ok(Self {
                conn: tx.conn.clone(),
                owned: false,
            }),
            None => Ok(Self {
                conn: ds.connect()?,
                owned: true,
            }),
        }
    }

    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    pub fn is_transactional(&self) -> bool {
        !self.owned
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.conn.close() {
                tracing::warn!(error = %e, "closing connection failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daoplan_io::memory::{MemoryDataSource, TableDef};

    fn ds() -> MemoryDataSource {
        MemoryDataSource::new("tx-test")
            .with_table(TableDef::new("t").auto_increment("id").column("v"))
            .expect("table")
    }

    fn insert(ds: &MemoryDataSource, v: &str) {
        let lease = ConnectionLease::acquire(ds).expect("lease");
        let mut st = lease
            .connection()
            .prepare(
                &format!("INSERT INTO t (v) VALUES ('{v}')"),
                &Default::default(),
            )
            .expect("prepare");
        st.execute_update().expect("insert");
    }

    #[test]
    fn required_joins_and_owner_commits() {
        let ds = ds();
        let outer = begin(&ds).expect("begin");
        assert!(outer.is_owner());
        let inner = begin(&ds).expect("join");
        assert!(!inner.is_owner());
        assert_eq!(inner.id(), outer.id());
        insert(&ds, "a");
        inner.commit().expect("joined commit is a no-op");
        assert!(in_transaction("tx-test"));
        outer.commit().expect("commit");
        assert!(!in_transaction("tx-test"));
        assert_eq!(ds.row_count("t"), 1);
        assert_eq!(ds.counters().commits, 1);
        assert_eq!(ds.counters().open_connections, 0);
    }

    #[test]
    fn participant_rollback_poisons_the_owner() {
        let ds = ds();
        let outer = begin(&ds).expect("begin");
        insert(&ds, "a");
        begin(&ds).expect("join").rollback().expect("mark");
        assert_eq!(outer.status(), TxStatus::RollbackOnly);
        assert!(matches!(outer.commit(), Err(Error::Transaction(_))));
        assert_eq!(ds.row_count("t"), 0);
    }

    #[test]
    fn requires_new_is_isolated_from_the_ambient_transaction() {
        let ds = ds();
        let outer = begin(&ds).expect("begin");
        insert(&ds, "a");
        {
            let inner = begin_new(&ds).expect("new");
            assert_ne!(inner.id(), outer.id());
            insert(&ds, "b");
            assert_eq!(ds.row_count("t"), 2);
            // dropped without commit
        }
        assert_eq!(outer.status(), TxStatus::Active);
        assert_eq!(ds.row_count("t"), 1);
        drop(outer);
        assert_eq!(ds.row_count("t"), 0);
    }

    #[test]
    fn suspension_hides_the_ambient_transaction() {
        let ds = ds();
        let outer = begin(&ds).expect("begin");
        {
            let _guard = suspend("tx-test");
            assert!(!in_transaction("tx-test"));
            insert(&ds, "standalone");
        }
        assert!(in_transaction("tx-test"));
        outer.rollback().expect("rollback");
        assert_eq!(ds.row_count("t"), 1);
    }

    struct Refusing;

    impl daoplan_core::connect::Connection for Refusing {
        fn prepare(
            &self,
            _sql: &str,
            _options: &daoplan_core::connect::StatementOptions,
        ) -> Result<Box<dyn daoplan_core::connect::Statement>> {
            Err(Error::Statement("refusing".into()))
        }
        fn begin(&self) -> Result<()> {
            Err(Error::Transaction("begin refused".into()))
        }
        fn commit(&self) -> Result<()> {
            Ok(())
        }
        fn rollback(&self) -> Result<()> {
            Ok(())
        }
        fn close(&self) -> Result<()> {
            Err(Error::Statement("close refused".into()))
        }
    }

    impl DataSource for Refusing {
        fn id(&self) -> &str {
            "tx-refusing"
        }
        fn connect(&self) -> Result<Arc<dyn daoplan_core::connect::Connection>> {
            Ok(Arc::new(Refusing))
        }
    }

    #[test]
    fn a_failed_begin_keeps_the_close_failure() {
        let err = begin(&Refusing).unwrap_err();
        assert!(matches!(err.primary(), Error::Transaction(_)), "{err}");
        assert!(matches!(err.suppressed(), [Error::Statement(_)]));
        assert!(!in_transaction("tx-refusing"));
    }
}
