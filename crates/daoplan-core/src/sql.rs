//! Placeholder parsing for positional (`?`) and named (`:name`, `#{name}`) SQL.
//!
//! Parsing happens once per method at bind time. The statement layer only ever
//! sees the positional form; named binding is resolved against `names`.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    original: String,
    positional: String,
    names: Vec<String>,
    count: usize,
}

impl ParsedSql {
    pub fn parse(sql: &str) -> Result<Self> {
        let sql = sql.trim();
        let chars: Vec<char> = sql.chars().collect();
        let mut positional = String::with_capacity(sql.len());
        let mut names = Vec::new();
        let mut question_marks = 0usize;
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            if let Some(q) = quote {
                positional.push(ch);
                if ch == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    positional.push(ch);
                    i += 1;
                }
                '?' => {
                    question_marks += 1;
                    positional.push('?');
                    i += 1;
                }
                ':' if chars.get(i + 1) == Some(&':') => {
                    // `::type` cast
                    positional.push_str("::");
                    i += 2;
                }
                ':' if chars.get(i + 1).is_some_and(|c| is_ident_start(*c))
                    && (i == 0 || chars[i - 1] != ':') =>
                {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_ident_part(chars[end]) {
                        end += 1;
                    }
                    names.push(chars[start..end].iter().collect());
                    positional.push('?');
                    i = end;
                }
                '#' if chars.get(i + 1) == Some(&'{') => {
                    let start = i + 2;
                    let close = chars[start..]
                        .iter()
                        .position(|c| *c == '}')
                        .map(|p| start + p)
                        .ok_or_else(|| {
                            Error::config(format!("unterminated '#{{' placeholder in: {sql}"))
                        })?;
                    let name: String = chars[start..close].iter().collect::<String>();
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(Error::config(format!("empty '#{{}}' placeholder in: {sql}")));
                    }
                    names.push(name.to_string());
                    positional.push('?');
                    i = close + 1;
                }
                _ => {
                    positional.push(ch);
                    i += 1;
                }
            }
        }

        if question_marks > 0 && !names.is_empty() {
            return Err(Error::config(format!(
                "cannot mix '?' and named parameters in: {sql}"
            )));
        }

        let count = question_marks + names.len();
        Ok(Self {
            original: sql.to_string(),
            positional,
            names,
            count,
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    /// SQL with every placeholder rewritten to `?`.
    pub fn positional(&self) -> &str {
        &self.positional
    }

    /// One entry per named placeholder occurrence, in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_named(&self) -> bool {
        !self.names.is_empty()
    }

    pub fn parameter_count(&self) -> usize {
        self.count
    }

    /// Zero-based positions bound by `name`.
    pub fn positions_of(&self, name: &str) -> Vec<usize> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.as_str() == name)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn distinct_names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for n in &self.names {
            if !out.contains(&n.as_str()) {
                out.push(n);
            }
        }
        out
    }
}

/// Replace `{name}` template markers (not `#{name}` placeholders).
pub fn substitute_define(sql: &str, name: &str, replacement: &str) -> String {
    let marker = format!("{{{name}}}");
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find(&marker) {
        let is_placeholder = rest[..pos].ends_with('#');
        out.push_str(&rest[..pos]);
        if is_placeholder {
            out.push_str(&marker);
        } else {
            out.push_str(replacement);
        }
        rest = &rest[pos + marker.len()..];
    }
    out.push_str(rest);
    out
}

/// True when `{name}` occurs as a template marker in `sql`.
pub fn has_define(sql: &str, name: &str) -> bool {
    substitute_define(sql, name, "\u{0}") != sql
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_placeholders_are_rewritten_in_order() {
        let p = ParsedSql::parse(
            "  SELECT * FROM account WHERE id = :id OR parent = #{id} AND name = :name ",
        )
        .expect("parse");
        assert_eq!(
            p.positional(),
            "SELECT * FROM account WHERE id = ? OR parent = ? AND name = ?"
        );
        assert_eq!(p.names(), &["id", "id", "name"]);
        assert_eq!(p.positions_of("id"), vec![0, 1]);
        assert_eq!(p.distinct_names(), vec!["id", "name"]);
    }

    #[test]
    fn quotes_and_casts_are_left_alone() {
        let p = ParsedSql::parse("SELECT ':x', a::int FROM t WHERE b = ?").expect("parse");
        assert_eq!(p.parameter_count(), 1);
        assert!(!p.is_named());
        assert_eq!(p.positional(), "SELECT ':x', a::int FROM t WHERE b = ?");
    }

    #[test]
    fn mixing_styles_is_rejected() {
        let err = ParsedSql::parse("SELECT * FROM t WHERE a = ? AND b = :b").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn defines_skip_hash_placeholders() {
        let sql = "SELECT * FROM {table} WHERE id = #{table}";
        assert_eq!(
            substitute_define(sql, "table", "account"),
            "SELECT * FROM account WHERE id = #{table}"
        );
        assert!(has_define(sql, "table"));
        assert!(!has_define("SELECT #{table}", "table"));
    }
}
