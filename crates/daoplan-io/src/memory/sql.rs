//! Tokenizer and parser for the SQL subset the memory engine understands.
//!
//! Statements:
//!   INSERT INTO t (a, b) VALUES (?, ?)[, (...)]
//!   SELECT * | 1 | count(*) | a [AS x], ... FROM t [WHERE ...] [ORDER BY a [DESC], ...] [LIMIT n]
//!   UPDATE t SET a = ?, ... [WHERE ...]
//!   DELETE FROM t [WHERE ...]
//!   CALL name(?, ...)
//!
//! WHERE is a conjunction of `col op expr`, `col [NOT] IN (...)`, and
//! `col IS [NOT] NULL`.

use daoplan_core::error::{Error, Result};
use daoplan_core::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// Zero-based placeholder index.
    Param(usize),
    Lit(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pred {
    Cmp { column: String, op: CmpOp, rhs: Expr },
    In { column: String, list: Vec<Expr>, negated: bool },
    IsNull { column: String, negated: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    All,
    One,
    CountAll,
    /// (column, label)
    Columns(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Expr>>,
    },
    Select {
        projection: Projection,
        table: String,
        filter: Vec<Pred>,
        order: Vec<(String, bool)>,
        limit: Option<Expr>,
    },
    Update {
        table: String,
        sets: Vec<(String, Expr)>,
        filter: Vec<Pred>,
    },
    Delete {
        table: String,
        filter: Vec<Pred>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(String),
    Str(String),
    Sym(&'static str),
    Param,
}

fn tokenize(sql: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '?' => {
                out.push(Tok::Param);
                i += 1;
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax(sql, "unterminated string literal")),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                out.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                out.push(Tok::Num(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '"' || c == '`' => {
                let quoted = c == '"' || c == '`';
                let start = if quoted { i + 1 } else { i };
                i = start;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if quoted {
                    i += 1;
                }
                out.push(Tok::Ident(ident));
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                out.push(Tok::Sym("<="));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'>') => {
                out.push(Tok::Sym("<>"));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                out.push(Tok::Sym(">="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                out.push(Tok::Sym("<>"));
                i += 2;
            }
            '(' | ')' | ',' | '*' | '=' | '<' | '>' | ';' | '-' => {
                out.push(Tok::Sym(match c {
                    '(' => "(",
                    ')' => ")",
                    ',' => ",",
                    '*' => "*",
                    '=' => "=",
                    '<' => "<",
                    '>' => ">",
                    ';' => ";",
                    _ => "-",
                }));
                i += 1;
            }
            other => return Err(syntax(sql, &format!("unexpected character '{other}'"))),
        }
    }
    Ok(out)
}

fn syntax(sql: &str, msg: &str) -> Error {
    Error::Statement(format!("syntax error: {msg} in: {sql}"))
}

struct Parser<'a> {
    sql: &'a str,
    toks: Vec<Tok>,
    pos: usize,
    params: usize,
}

/// Parse one statement; returns it with its placeholder count.
pub(crate) fn parse(sql: &str) -> Result<(Stmt, usize)> {
    let mut p = Parser {
        sql,
        toks: tokenize(sql)?,
        pos: 0,
        params: 0,
    };
    let stmt = p.statement()?;
    p.eat_sym(";");
    if p.pos != p.toks.len() {
        return Err(p.err("unexpected trailing input"));
    }
    Ok((stmt, p.params))
}

impl Parser<'_> {
    fn err(&self, msg: &str) -> Error {
        syntax(self.sql, &format!("{msg} at token {}", self.pos))
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.err(&format!("expected {kw}")))
        }
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<()> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.err(&format!("expected '{sym}'")))
        }
    }

    /// Identifier, lower-cased, with any `table.` qualifier dropped.
    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Tok::Ident(s)) => {
                let name = s.rsplit('.').next().unwrap_or(s.as_str()).to_ascii_lowercase();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.err("expected identifier")),
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        if self.eat_kw("insert") {
            self.insert()
        } else if self.eat_kw("select") {
            self.select()
        } else if self.eat_kw("update") {
            self.update()
        } else if self.eat_kw("delete") {
            self.expect_kw("from")?;
            let table = self.ident()?;
            let filter = self.where_clause()?;
            Ok(Stmt::Delete { table, filter })
        } else if self.eat_kw("call") {
            let name = self.ident()?;
            let mut args = Vec::new();
            if self.eat_sym("(") && !self.eat_sym(")") {
                loop {
                    args.push(self.expr()?);
                    if self.eat_sym(")") {
                        break;
                    }
                    self.expect_sym(",")?;
                }
            }
            Ok(Stmt::Call { name, args })
        } else {
            Err(self.err("unsupported statement"))
        }
    }

    fn insert(&mut self) -> Result<Stmt> {
        self.expect_kw("into")?;
        let table = self.ident()?;
        self.expect_sym("(")?;
        let mut columns = vec![self.ident()?];
        while self.eat_sym(",") {
            columns.push(self.ident()?);
        }
        self.expect_sym(")")?;
        self.expect_kw("values")?;
        let mut rows = Vec::new();
        loop {
            self.expect_sym("(")?;
            let mut row = vec![self.expr()?];
            while self.eat_sym(",") {
                row.push(self.expr()?);
            }
            self.expect_sym(")")?;
            if row.len() != columns.len() {
                return Err(self.err("VALUES arity does not match the column list"));
            }
            rows.push(row);
            if !self.eat_sym(",") {
                break;
            }
        }
        Ok(Stmt::Insert {
            table,
            columns,
            rows,
        })
    }

    fn select(&mut self) -> Result<Stmt> {
        let projection = if self.eat_sym("*") {
            Projection::All
        } else if matches!(self.peek(), Some(Tok::Num(n)) if n == "1") {
            self.pos += 1;
            Projection::One
        } else if self.is_kw("count") {
            self.pos += 1;
            self.expect_sym("(")?;
            if !self.eat_sym("*") {
                self.expr()?;
            }
            self.expect_sym(")")?;
            if self.eat_kw("as") {
                self.ident()?;
            }
            Projection::CountAll
        } else {
            let mut cols = Vec::new();
            loop {
                let col = self.ident()?;
                let label = if self.eat_kw("as") {
                    self.ident()?
                } else {
                    col.clone()
                };
                cols.push((col, label));
                if !self.eat_sym(",") {
                    break;
                }
            }
            Projection::Columns(cols)
        };
        self.expect_kw("from")?;
        let table = self.ident()?;
        let filter = self.where_clause()?;

        let mut order = Vec::new();
        if self.eat_kw("order") {
            self.expect_kw("by")?;
            loop {
                let col = self.ident()?;
                let desc = if self.eat_kw("desc") {
                    true
                } else {
                    self.eat_kw("asc");
                    false
                };
                order.push((col, desc));
                if !self.eat_sym(",") {
                    break;
                }
            }
        }
        let limit = if self.eat_kw("limit") {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Stmt::Select {
            projection,
            table,
            filter,
            order,
            limit,
        })
    }

    fn update(&mut self) -> Result<Stmt> {
        let table = self.ident()?;
        self.expect_kw("set")?;
        let mut sets = Vec::new();
        loop {
            let col = self.ident()?;
            self.expect_sym("=")?;
            sets.push((col, self.expr()?));
            if !self.eat_sym(",") {
                break;
            }
        }
        let filter = self.where_clause()?;
        Ok(Stmt::Update {
            table,
            sets,
            filter,
        })
    }

    fn where_clause(&mut self) -> Result<Vec<Pred>> {
        let mut preds = Vec::new();
        if !self.eat_kw("where") {
            return Ok(preds);
        }
        loop {
            preds.push(self.predicate()?);
            if !self.eat_kw("and") {
                break;
            }
        }
        Ok(preds)
    }

    fn predicate(&mut self) -> Result<Pred> {
        let column = self.ident()?;
        if self.eat_kw("is") {
            let negated = self.eat_kw("not");
            self.expect_kw("null")?;
            return Ok(Pred::IsNull { column, negated });
        }
        let negated = self.eat_kw("not");
        if self.eat_kw("in") {
            self.expect_sym("(")?;
            let mut list = vec![self.expr()?];
            while self.eat_sym(",") {
                list.push(self.expr()?);
            }
            self.expect_sym(")")?;
            return Ok(Pred::In {
                column,
                list,
                negated,
            });
        }
        if negated {
            return Err(self.err("expected IN after NOT"));
        }
        let op = match self.peek() {
            Some(Tok::Sym("=")) => CmpOp::Eq,
            Some(Tok::Sym("<>")) => CmpOp::Ne,
            Some(Tok::Sym("<")) => CmpOp::Lt,
            Some(Tok::Sym(">")) => CmpOp::Gt,
            Some(Tok::Sym("<=")) => CmpOp::Le,
            Some(Tok::Sym(">=")) => CmpOp::Ge,
            _ => return Err(self.err("expected comparison operator")),
        };
        self.pos += 1;
        Ok(Pred::Cmp {
            column,
            op,
            rhs: self.expr()?,
        })
    }

    fn expr(&mut self) -> Result<Expr> {
        let negative = self.eat_sym("-");
        let tok = self.peek().cloned();
        let expr = match tok {
            Some(Tok::Param) if !negative => {
                let idx = self.params;
                self.params += 1;
                Expr::Param(idx)
            }
            Some(Tok::Num(n)) => {
                let n = if negative { format!("-{n}") } else { n };
                if n.contains('.') {
                    Expr::Lit(Value::Float(n.parse().map_err(|_| self.err("bad number"))?))
                } else {
                    Expr::Lit(Value::Int(n.parse().map_err(|_| self.err("bad number"))?))
                }
            }
            Some(Tok::Str(s)) if !negative => Expr::Lit(Value::Str(s)),
            Some(Tok::Ident(s)) if !negative && s.eq_ignore_ascii_case("null") => {
                Expr::Lit(Value::Null)
            }
            Some(Tok::Ident(s)) if !negative && s.eq_ignore_ascii_case("true") => {
                Expr::Lit(Value::Bool(true))
            }
            Some(Tok::Ident(s)) if !negative && s.eq_ignore_ascii_case("false") => {
                Expr::Lit(Value::Bool(false))
            }
            _ => return Err(self.err("expected a value or '?'")),
        };
        self.pos += 1;
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_select_with_filters_order_and_limit() {
        let (stmt, params) = parse(
            "SELECT id, first_name AS name FROM account WHERE id IN (?, ?) AND age >= ? AND email IS NOT NULL ORDER BY id DESC LIMIT 10",
        )
        .expect("parse");
        assert_eq!(params, 3);
        match stmt {
            Stmt::Select {
                projection: Projection::Columns(cols),
                table,
                filter,
                order,
                limit,
            } => {
                assert_eq!(table, "account");
                assert_eq!(cols[1], ("first_name".to_string(), "name".to_string()));
                assert_eq!(filter.len(), 3);
                assert_eq!(order, vec![("id".to_string(), true)]);
                assert_eq!(limit, Some(Expr::Lit(Value::Int(10))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_writes_and_calls() {
        let (stmt, params) =
            parse("INSERT INTO account (id, name) VALUES (?, 'o''brien'), (-3, NULL)").expect("parse");
        assert_eq!(params, 1);
        match stmt {
            Stmt::Insert { rows, .. } => {
                assert_eq!(rows[0][1], Expr::Lit(Value::Str("o'brien".into())));
                assert_eq!(rows[1][0], Expr::Lit(Value::Int(-3)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse("UPDATE account SET name = ? WHERE id = ?").expect("parse"),
            (Stmt::Update { .. }, 2)
        ));
        assert!(matches!(
            parse("CALL refresh_totals(?)").expect("parse"),
            (Stmt::Call { .. }, 1)
        ));
        assert!(matches!(
            parse("SELECT count(*) FROM account").expect("parse"),
            (Stmt::Select { projection: Projection::CountAll, .. }, 0)
        ));
    }

    #[test]
    fn rejects_what_it_does_not_understand() {
        assert!(parse("SELECT * FROM a JOIN b").is_err());
        assert!(parse("INSERT INTO a (x, y) VALUES (?)").is_err());
        assert!(parse("MERGE INTO a").is_err());
    }
}
