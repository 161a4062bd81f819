//! Property-name to column-name conventions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    /// `accountName` -> `account_name`
    #[default]
    LowerCaseWithUnderscore,
    /// `accountName` -> `ACCOUNT_NAME`
    UpperCaseWithUnderscore,
    /// `account_name` -> `accountName`
    LowerCamelCase,
    NoChange,
}

impl NamingPolicy {
    pub fn apply(self, name: &str) -> String {
        match self {
            NamingPolicy::LowerCaseWithUnderscore => to_snake(name),
            NamingPolicy::UpperCaseWithUnderscore => to_snake(name).to_ascii_uppercase(),
            NamingPolicy::LowerCamelCase => to_lower_camel(name),
            NamingPolicy::NoChange => name.to_string(),
        }
    }
}

fn to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

fn to_lower_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for (i, ch) in name.chars().enumerate() {
        if ch == '_' {
            upper_next = i > 0;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Loose identifier comparison used to match result columns to properties:
/// ignores case and underscores so `first_name`, `FIRST_NAME` and
/// `firstName` all line up.
pub fn loosely_equal(a: &str, b: &str) -> bool {
    let mut ia = a.chars().filter(|c| *c != '_');
    let mut ib = b.chars().filter(|c| *c != '_');
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x.eq_ignore_ascii_case(&y) => continue,
            _ => return false,
        }
    }
}
