//! Operation tag (+ optional SQL mapper) -> `QueryDescriptor`.

use daoplan_core::config::DaoConfig;
use daoplan_core::decl::{MethodDecl, OpTag, OperationKind, QueryDescriptor, Verb};
use daoplan_core::error::{Error, Result};
use daoplan_core::mapper::SqlLookup;
use daoplan_core::sql::ParsedSql;

/// Resolve the query a method runs. Attributes of a mapper entry override the
/// ones on the tag; whatever is still unset falls back to `cfg`.
pub fn resolve(
    method: &MethodDecl,
    tag: &OpTag,
    lookup: Option<&dyn SqlLookup>,
    cfg: &DaoConfig,
) -> Result<QueryDescriptor> {
    let mut timeout = tag.timeout;
    let mut fetch_size = tag.fetch_size;
    let mut batch_size = tag.batch_size;

    let text = match (&tag.sql, &tag.id) {
        (Some(_), Some(id)) => {
            return Err(Error::config(format!(
                "method '{}' declares both inline SQL and SQL id '{id}'",
                method.name
            )))
        }
        (Some(sql), None) => sql.clone(),
        (None, Some(id)) => {
            let lookup = lookup.ok_or_else(|| {
                Error::config(format!(
                    "method '{}' references SQL id '{id}' but no SQL mapper was supplied",
                    method.name
                ))
            })?;
            let entry = lookup.get(id).ok_or_else(|| {
                Error::config(format!(
                    "SQL id '{id}' referenced by method '{}' is not in the SQL mapper",
                    method.name
                ))
            })?;
            timeout = entry.timeout.or(timeout);
            if tag.verb == Verb::Select {
                fetch_size = entry.fetch_size.or(fetch_size);
            }
            if tag.verb.is_write() {
                batch_size = entry.batch_size.or(batch_size);
            }
            entry.sql
        }
        (None, None) => {
            return Err(Error::config(format!(
                "method '{}' declares neither SQL text nor a SQL id",
                method.name
            )))
        }
    };

    if text.trim().is_empty() {
        return Err(Error::config(format!("SQL of method '{}' is empty", method.name)));
    }

    if tag.fetch_size.is_some() && tag.verb != Verb::Select {
        return Err(Error::config(format!(
            "fetch size on method '{}' applies to select operations only",
            method.name
        )));
    }
    if (tag.batch || tag.batch_size.is_some()) && !tag.verb.is_write() {
        return Err(Error::config(format!(
            "batch settings on method '{}' apply to insert/update/delete operations only",
            method.name
        )));
    }
    check_kind(method, tag)?;

    let batch_size = batch_size.unwrap_or(cfg.default_batch_size);
    if batch_size == 0 {
        return Err(Error::config(format!(
            "batch size of method '{}' must be positive",
            method.name
        )));
    }

    let sql = ParsedSql::parse(&text)?;
    if !tag.named && sql.is_named() {
        return Err(Error::config(format!(
            "method '{}' uses named placeholders but is not declared as a named query",
            method.name
        )));
    }
    if tag.named && !sql.is_named() && sql.parameter_count() > 0 {
        return Err(Error::config(format!(
            "named query '{}' uses '?' placeholders",
            method.name
        )));
    }

    if tag.verb == Verb::Select && tag.kind == OperationKind::Stream {
        fetch_size = fetch_size.or(cfg.stream_fetch_size);
    }

    Ok(QueryDescriptor {
        sql,
        query_timeout: timeout,
        fetch_size,
        is_batch: tag.batch,
        batch_size,
        verb: tag.verb,
        kind: tag.kind,
        named: tag.named,
        single_parameter: tag.single_parameter,
    })
}

fn check_kind(method: &MethodDecl, tag: &OpTag) -> Result<()> {
    use OperationKind::*;
    let ok = match tag.verb {
        Verb::Select => matches!(
            tag.kind,
            Default | Exists | Get | FindFirst | List | Query | Stream | QueryForSingle
        ),
        Verb::Insert | Verb::Update | Verb::Delete => {
            matches!(tag.kind, Default | Update | LargeUpdate)
        }
        Verb::Call => matches!(tag.kind, Default | Call | Query | List),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::config(format!(
            "operation kind {:?} is not valid for a {:?} method ('{}')",
            tag.kind, tag.verb, method.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daoplan_core::mapper::{SqlEntry, SqlMapper};
    use daoplan_core::shape::TypeShape;

    fn method() -> MethodDecl {
        MethodDecl::new("findById", TypeShape::entity("Account"))
    }

    #[test]
    fn mapper_entries_override_tag_attributes() {
        let mapper = SqlMapper::new().add(
            "account.find",
            SqlEntry {
                sql: " SELECT * FROM account WHERE id = :id ".into(),
                timeout: Some(9),
                fetch_size: Some(50),
                batch_size: Some(7),
            },
        );
        let tag = OpTag::by_id(Verb::Select, true, "account.find").timeout(1);
        let desc = resolve(&method(), &tag, Some(&mapper), &DaoConfig::default()).expect("resolve");
        assert_eq!(desc.text(), "SELECT * FROM account WHERE id = :id");
        assert_eq!(desc.query_timeout, Some(9));
        assert_eq!(desc.fetch_size, Some(50));
        // batch size belongs to writes; the select keeps the default
        assert_eq!(desc.batch_size, 200);
    }

    #[test]
    fn missing_ids_and_mappers_are_config_errors() {
        let tag = OpTag::by_id(Verb::Select, false, "nope");
        let err = resolve(&method(), &tag, None, &DaoConfig::default()).unwrap_err();
        assert!(err.is_config());
        let err = resolve(&method(), &tag, Some(&SqlMapper::new()), &DaoConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn family_specific_attributes_are_checked() {
        let cfg = DaoConfig::default();
        let tag = OpTag::update("UPDATE t SET a = ?").fetch_size(10);
        assert!(resolve(&method(), &tag, None, &cfg).unwrap_err().is_config());

        let tag = OpTag::select("SELECT 1").batch(10);
        assert!(resolve(&method(), &tag, None, &cfg).unwrap_err().is_config());

        let tag = OpTag::insert("INSERT INTO t (a) VALUES (?)").batch(0);
        assert!(resolve(&method(), &tag, None, &cfg).unwrap_err().is_config());

        let tag = OpTag::insert("INSERT INTO t (a) VALUES (?)").kind(OperationKind::Stream);
        assert!(resolve(&method(), &tag, None, &cfg).unwrap_err().is_config());
    }

    #[test]
    fn placeholder_style_must_match_the_tag() {
        let cfg = DaoConfig::default();
        let tag = OpTag::select("SELECT * FROM t WHERE id = :id");
        assert!(resolve(&method(), &tag, None, &cfg).is_err());
        let tag = OpTag::named_select("SELECT * FROM t WHERE id = ?");
        assert!(resolve(&method(), &tag, None, &cfg).is_err());
        let tag = OpTag::named_select("SELECT count(*) FROM t");
        assert!(resolve(&method(), &tag, None, &cfg).is_ok());
    }
}
