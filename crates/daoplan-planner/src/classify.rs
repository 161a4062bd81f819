//! List / exists analysis of select methods.
//!
//! Only methods whose kind is left at `Default` are classified heuristically;
//! an explicit `List` or `Exists` kind is validated against the method shape
//! instead.

use daoplan_core::decl::{MethodDecl, OperationKind};
use daoplan_core::error::{Error, Result};
use daoplan_core::shape::TypeShape;

/// Name prefixes that imply a single-row result.
const SINGLE_RESULT_PREFIXES: &[&str] = &["get", "findFirst", "findOne", "find_first", "find_one"];

/// Name prefixes that imply an existence check.
const EXISTS_PREFIXES: &[&str] = &["exists", "exist", "has"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub is_list_query: bool,
    pub is_exists_query: bool,
}

pub fn classify(method: &MethodDecl, kind: OperationKind) -> Result<Classification> {
    Ok(Classification {
        is_list_query: is_list_query(method, kind)?,
        is_exists_query: is_exists_query(method, kind)?,
    })
}

fn trailing(method: &MethodDecl) -> Option<&TypeShape> {
    method.last_param().map(|p| &p.shape)
}

/// Whether a select method produces a list of mapped rows.
pub fn is_list_query(method: &MethodDecl, kind: OperationKind) -> Result<bool> {
    let last = trailing(method);
    let ends_with_extractor = last.is_some_and(TypeShape::is_result_extractor);

    if kind == OperationKind::List {
        if !method.returns.is_collection() {
            return Err(Error::config(format!(
                "method '{}' is declared as a list query but returns {}",
                method.name, method.returns
            )));
        }
        if ends_with_extractor {
            return Err(Error::config(format!(
                "method '{}' is declared as a list query but takes a result extractor",
                method.name
            )));
        }
        return Ok(true);
    }

    if kind != OperationKind::Default || ends_with_extractor {
        return Ok(false);
    }

    if !method.returns.is_collection() {
        return Ok(false);
    }

    if let Some(TypeShape::RowMapper(mapped)) = last {
        // A row mapper decides on its own: if its output fits the element
        // type the rows become the list; if it produces the whole return
        // type, it is a single-row query.
        let element = method.returns.element();
        if element.is_some_and(|e| e.accepts(mapped)) {
            return Ok(true);
        }
        if **mapped == method.returns {
            return Ok(false);
        }
        return Ok(true);
    }

    Ok(!SINGLE_RESULT_PREFIXES
        .iter()
        .any(|p| method.name.starts_with(p)))
}

/// Whether a select method is an existence check (returns `bool`).
pub fn is_exists_query(method: &MethodDecl, kind: OperationKind) -> Result<bool> {
    let has_callback = trailing(method)
        .is_some_and(|s| s.is_row_mapper() || s.is_result_extractor());

    if kind == OperationKind::Exists {
        if !method.returns.is_bool() {
            return Err(Error::config(format!(
                "method '{}' is declared as an exists query but returns {}",
                method.name, method.returns
            )));
        }
        if has_callback {
            return Err(Error::config(format!(
                "exists query '{}' cannot take a row mapper or result extractor",
                method.name
            )));
        }
        return Ok(true);
    }

    Ok(kind == OperationKind::Default
        && method.returns.is_bool()
        && !has_callback
        && has_exists_prefix(&method.name))
}

/// `exists`, `exist`, or `has`, followed by end of name, an uppercase letter,
/// or an underscore.
fn has_exists_prefix(name: &str) -> bool {
    EXISTS_PREFIXES.iter().any(|p| {
        name.strip_prefix(p).is_some_and(|rest| {
            rest.chars()
                .next()
                .map_or(true, |c| c.is_ascii_uppercase() || c == '_')
        })
    })
}
