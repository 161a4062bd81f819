//! Statement evaluation over in-memory tables.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use daoplan_core::error::{Error, Result};
use daoplan_core::value::{RowSet, Value};

use super::sql::{CmpOp, Expr, Pred, Projection, Stmt};

pub(crate) type StoredValues = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub(crate) struct StoredRow {
    pub rowid: u64,
    pub values: StoredValues,
}

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub columns: Vec<String>,
    pub key: Option<String>,
    pub auto_increment: bool,
    pub next_id: i64,
    pub rows: Vec<StoredRow>,
}

/// Reverse operation recorded by a connection inside a transaction.
#[derive(Debug, Clone)]
pub(crate) enum Undo {
    Inserted { table: String, rowid: u64 },
    Deleted { table: String, row: StoredRow },
    Updated { table: String, row: StoredRow },
}

#[derive(Debug, Default)]
pub(crate) struct Db {
    pub tables: HashMap<String, Table>,
    pub next_rowid: u64,
}

/// Outcome of one statement execution.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub rows: Option<RowSet>,
    pub count: u64,
    pub keys: Vec<Value>,
    pub undo: Vec<Undo>,
}

fn eval(expr: &Expr, params: &[Value]) -> Result<Value> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Param(i) => params
            .get(*i)
            .cloned()
            .ok_or_else(|| Error::Statement(format!("parameter {} is not set", i + 1))),
    }
}

/// SQL equality: NULL never equals anything.
fn sql_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Str(x), Value::Str(y)) => x == y,
        _ => a.compare(b) == Some(Ordering::Equal) || a == b,
    }
}

fn matches(row: &StoredValues, filter: &[Pred], params: &[Value]) -> Result<bool> {
    for pred in filter {
        let ok = match pred {
            Pred::Cmp { column, op, rhs } => {
                let lhs = row.get(column).unwrap_or(&Value::Null);
                let rhs = eval(rhs, params)?;
                match op {
                    CmpOp::Eq => sql_eq(lhs, &rhs),
                    CmpOp::Ne => !lhs.is_null() && !rhs.is_null() && !sql_eq(lhs, &rhs),
                    CmpOp::Lt => lhs.compare(&rhs) == Some(Ordering::Less),
                    CmpOp::Gt => lhs.compare(&rhs) == Some(Ordering::Greater),
                    CmpOp::Le => matches!(lhs.compare(&rhs), Some(Ordering::Less | Ordering::Equal)),
                    CmpOp::Ge => {
                        matches!(lhs.compare(&rhs), Some(Ordering::Greater | Ordering::Equal))
                    }
                }
            }
            Pred::In {
                column,
                list,
                negated,
            } => {
                let lhs = row.get(column).unwrap_or(&Value::Null);
                let mut found = false;
                for e in list {
                    if sql_eq(lhs, &eval(e, params)?) {
                        found = true;
                        break;
                    }
                }
                !lhs.is_null() && found != *negated
            }
            Pred::IsNull { column, negated } => {
                row.get(column).map_or(true, Value::is_null) != *negated
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

impl Table {
    fn check_columns<'a>(&self, table: &str, cols: impl IntoIterator<Item = &'a String>) -> Result<()> {
        for c in cols {
            if !self.columns.contains(c) {
                return Err(Error::Statement(format!("unknown column '{c}' in table '{table}'")));
            }
        }
        Ok(())
    }

    fn key_taken(&self, value: &Value, except: Option<u64>) -> bool {
        let Some(key) = &self.key else {
            return false;
        };
        self.rows
            .iter()
            .any(|r| Some(r.rowid) != except && r.values.get(key).is_some_and(|v| sql_eq(v, value)))
    }
}

impl Db {
    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::Statement(format!("no such table '{name}'")))
    }

    /// Execute a parsed statement (anything but CALL). A failing statement
    /// leaves no partial effects behind.
    pub fn apply(&mut self, stmt: &Stmt, params: &[Value], max_rows: Option<u64>) -> Result<Applied> {
        let mut out = Applied::default();
        let res = match stmt {
            Stmt::Insert {
                table,
                columns,
                rows,
            } => self.insert(table, columns, rows, params, &mut out),
            Stmt::Select {
                projection,
                table,
                filter,
                order,
                limit,
            } => {
                let limit = match limit {
                    Some(e) => eval(e, params)?.as_i64().map(|n| n.max(0) as u64),
                    None => None,
                };
                let cap = match (limit, max_rows.filter(|m| *m > 0)) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                self.select(table, projection, filter, order, cap, params)
                    .map(|rows| {
                        out.count = rows.len() as u64;
                        out.rows = Some(rows);
                    })
            }
            Stmt::Update {
                table,
                sets,
                filter,
            } => self.update(table, sets, filter, params, &mut out),
            Stmt::Delete { table, filter } => self.delete(table, filter, params, &mut out),
            Stmt::Call { name, .. } => Err(Error::Invariant(format!(
                "procedure '{name}' must be dispatched by the connection"
            ))),
        };
        match res {
            Ok(()) => Ok(out),
            Err(e) => {
                self.revert(std::mem::take(&mut out.undo));
                Err(e)
            }
        }
    }

    fn insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Expr>],
        params: &[Value],
        out: &mut Applied,
    ) -> Result<()> {
        let mut rowid = self.next_rowid;
        let t = self.table_mut(table)?;
        t.check_columns(table, columns)?;

        for exprs in rows {
            let mut values: StoredValues = t.columns.iter().map(|c| (c.clone(), Value::Null)).collect();
            for (c, e) in columns.iter().zip(exprs) {
                values.insert(c.clone(), eval(e, params)?);
            }
            if let Some(key) = t.key.clone() {
                let current = values.get(&key).cloned().unwrap_or(Value::Null);
                if t.auto_increment && current.is_default() {
                    let id = t.next_id;
                    t.next_id += 1;
                    values.insert(key, Value::Int(id));
                    out.keys.push(Value::Int(id));
                } else {
                    if t.key_taken(&current, None) {
                        return Err(Error::Statement(format!(
                            "duplicate key {current:?} in table '{table}'"
                        )));
                    }
                    if t.auto_increment {
                        if let Some(n) = current.as_i64() {
                            t.next_id = t.next_id.max(n + 1);
                        }
                    }
                }
            }
            rowid += 1;
            t.rows.push(StoredRow { rowid, values });
            out.undo.push(Undo::Inserted {
                table: table.to_string(),
                rowid,
            });
            out.count += 1;
        }
        self.next_rowid = rowid;
        Ok(())
    }

    fn select(
        &self,
        table: &str,
        projection: &Projection,
        filter: &[Pred],
        order: &[(String, bool)],
        cap: Option<u64>,
        params: &[Value],
    ) -> Result<RowSet> {
        let t = self
            .tables
            .get(table)
            .ok_or_else(|| Error::Statement(format!("no such table '{table}'")))?;
        t.check_columns(table, order.iter().map(|(c, _)| c))?;

        let mut hits: Vec<&StoredValues> = Vec::new();
        for r in &t.rows {
            if matches(&r.values, filter, params)? {
                hits.push(&r.values);
            }
        }
        if !order.is_empty() {
            hits.sort_by(|a, b| {
                for (col, desc) in order {
                    let x = a.get(col).unwrap_or(&Value::Null);
                    let y = b.get(col).unwrap_or(&Value::Null);
                    let ord = match (x.is_null(), y.is_null()) {
                        (true, true) => Ordering::Equal,
                        (true, false) => Ordering::Less,
                        (false, true) => Ordering::Greater,
                        _ => x.compare(y).unwrap_or(Ordering::Equal),
                    };
                    let ord = if *desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(cap) = cap {
            if !matches!(projection, Projection::CountAll) {
                hits.truncate(cap as usize);
            }
        }

        let (cols, labels): (Vec<String>, Vec<String>) = match projection {
            Projection::CountAll => {
                let mut rs = RowSet::new(vec!["count(*)".into()]);
                rs.rows.push(vec![Value::Int(hits.len() as i64)]);
                return Ok(rs);
            }
            Projection::All => (t.columns.clone(), t.columns.clone()),
            Projection::One => (Vec::new(), vec!["1".into()]),
            Projection::Columns(cs) => {
                t.check_columns(table, cs.iter().map(|(c, _)| c))?;
                cs.iter().cloned().unzip()
            }
        };
        let mut rs = RowSet::new(labels);
        for h in hits {
            if cols.is_empty() {
                rs.rows.push(vec![Value::Int(1)]);
            } else {
                rs.rows.push(
                    cols.iter()
                        .map(|c| h.get(c).cloned().unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }
        Ok(rs)
    }

    fn update(
        &mut self,
        table: &str,
        sets: &[(String, Expr)],
        filter: &[Pred],
        params: &[Value],
        out: &mut Applied,
    ) -> Result<()> {
        let t = self.table_mut(table)?;
        t.check_columns(table, sets.iter().map(|(c, _)| c))?;
        let mut assigned = Vec::with_capacity(sets.len());
        for (c, e) in sets {
            assigned.push((c.clone(), eval(e, params)?));
        }

        let mut targets = Vec::new();
        for (i, r) in t.rows.iter().enumerate() {
            if matches(&r.values, filter, params)? {
                targets.push(i);
            }
        }
        let new_key = t
            .key
            .as_ref()
            .and_then(|k| assigned.iter().find(|(c, _)| c == k))
            .map(|(_, v)| v.clone());
        if let Some(v) = &new_key {
            let clash = targets.len() > 1
                || targets
                    .first()
                    .is_some_and(|i| t.key_taken(v, Some(t.rows[*i].rowid)));
            if clash && !v.is_null() {
                return Err(Error::Statement(format!(
                    "duplicate key {v:?} in table '{table}'"
                )));
            }
        }
        for i in targets {
            out.undo.push(Undo::Updated {
                table: table.to_string(),
                row: t.rows[i].clone(),
            });
            for (c, v) in &assigned {
                t.rows[i].values.insert(c.clone(), v.clone());
            }
            out.count += 1;
        }
        Ok(())
    }

    fn delete(
        &mut self,
        table: &str,
        filter: &[Pred],
        params: &[Value],
        out: &mut Applied,
    ) -> Result<()> {
        let t = self.table_mut(table)?;
        let mut doomed = Vec::new();
        for r in &t.rows {
            if matches(&r.values, filter, params)? {
                doomed.push(r.rowid);
            }
        }
        let (gone, kept): (Vec<StoredRow>, Vec<StoredRow>) = std::mem::take(&mut t.rows)
            .into_iter()
            .partition(|r| doomed.contains(&r.rowid));
        t.rows = kept;
        out.count = gone.len() as u64;
        out.undo.extend(gone.into_iter().map(|row| Undo::Deleted {
            table: table.to_string(),
            row,
        }));
        Ok(())
    }

    /// Revert undo records, newest first.
    pub fn revert(&mut self, undo: Vec<Undo>) {
        for u in undo.into_iter().rev() {
            match u {
                Undo::Inserted { table, rowid } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.rows.retain(|r| r.rowid != rowid);
                    }
                }
                Undo::Deleted { table, row } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        let pos = t.rows.partition_point(|r| r.rowid < row.rowid);
                        t.rows.insert(pos, row);
                    }
                }
                Undo::Updated { table, row } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        if let Some(slot) = t.rows.iter_mut().find(|r| r.rowid == row.rowid) {
                            *slot = row;
                        }
                    }
                }
            }
        }
    }
}
