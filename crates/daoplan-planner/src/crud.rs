//! Synthesized identity operations for entity interfaces.
//!
//! SQL for every operation is rendered once from the entity descriptor and
//! the interface naming policy. The plans reuse the same bodies as declared
//! methods; only `insert`/`batch_insert` get a dedicated body, because they
//! pick between the with-id and without-id statement per entity.

use daoplan_core::config::DaoConfig;
use daoplan_core::decl::{
    EntityDescriptor, InterfaceDecl, MethodDecl, OperationKind, ParamDecl, QueryDescriptor, Verb,
};
use daoplan_core::error::{Error, Result};
use daoplan_core::id::MethodId;
use daoplan_core::naming::NamingPolicy;
use daoplan_core::shape::TypeShape;
use daoplan_core::sql::ParsedSql;

use crate::binding::{BindingShape, ItemBinding, ParameterBinding};
use crate::compile::{
    count_return, id_return, statement_log, MethodPlan, PlanBody, ReadAction, RowConversion,
    WriteAction,
};

pub const INSERT: &str = "insert";
pub const BATCH_INSERT: &str = "batch_insert";
pub const GET: &str = "get";
pub const EXISTS: &str = "exists";
pub const UPDATE: &str = "update";
pub const BATCH_UPDATE: &str = "batch_update";
pub const DELETE: &str = "delete";
pub const DELETE_BY_ID: &str = "delete_by_id";
pub const BATCH_DELETE_BY_IDS: &str = "batch_delete_by_ids";
pub const COUNT: &str = "count";

/// Every synthesized operation, in declaration order.
pub const OPERATIONS: &[&str] = &[
    INSERT,
    BATCH_INSERT,
    GET,
    EXISTS,
    UPDATE,
    BATCH_UPDATE,
    DELETE,
    DELETE_BY_ID,
    BATCH_DELETE_BY_IDS,
    COUNT,
];

/// Operations that need an identifier.
const KEYED_ONLY: &[&str] = &[
    GET,
    EXISTS,
    UPDATE,
    BATCH_UPDATE,
    DELETE,
    DELETE_BY_ID,
    BATCH_DELETE_BY_IDS,
];

pub fn is_crud_operation(name: &str) -> bool {
    OPERATIONS.contains(&name)
}

/// Operations available for `entity` (keyless entities only insert and count).
pub fn available_operations(entity: &EntityDescriptor) -> Vec<&'static str> {
    OPERATIONS
        .iter()
        .copied()
        .filter(|op| !(entity.is_keyless() && KEYED_ONLY.contains(op)))
        .collect()
}

/// Check the entity's id properties and the declared id type agree.
pub fn validate_entity(interface: &InterfaceDecl) -> Result<()> {
    let Some(entity) = &interface.entity else {
        if interface.crud {
            return Err(Error::config(format!(
                "interface '{}' synthesizes CRUD operations but declares no entity",
                interface.name
            )));
        }
        return Ok(());
    };

    for id in &entity.id {
        if entity.find(id).is_none() {
            return Err(Error::config(format!(
                "entity {} has no identifier property '{id}'",
                entity.name
            )));
        }
    }
    if !interface.crud || entity.is_keyless() {
        return Ok(());
    }

    let declared = interface.id_shape.as_ref().ok_or_else(|| {
        Error::config(format!(
            "interface '{}' synthesizes CRUD operations but declares no id type",
            interface.name
        ))
    })?;
    let matches = if entity.id.len() > 1 {
        matches!(declared, TypeShape::EntityId | TypeShape::Map)
    } else {
        let prop = entity.id_properties().next().map(|p| &p.shape);
        match prop {
            Some(shape) => declared.accepts(shape) || shape.accepts(declared),
            None => false,
        }
    };
    if !matches {
        return Err(Error::config(format!(
            "declared id type {declared} of interface '{}' does not match entity {}'s id",
            interface.name, entity.name
        )));
    }
    Ok(())
}

struct Sql<'a> {
    entity: &'a EntityDescriptor,
    naming: NamingPolicy,
    table: String,
}

impl<'a> Sql<'a> {
    fn new(entity: &'a EntityDescriptor, naming: NamingPolicy) -> Self {
        Self {
            entity,
            naming,
            table: entity.table_name(naming),
        }
    }

    fn column(&self, prop: &str) -> String {
        self.entity
            .find(prop)
            .map(|p| p.column_name(self.naming))
            .unwrap_or_else(|| self.naming.apply(prop))
    }

    fn where_id(&self) -> String {
        let parts: Vec<String> = self
            .entity
            .id
            .iter()
            .map(|id| format!("{} = :{id}", self.column(id)))
            .collect();
        parts.join(" AND ")
    }

    fn insert(&self, with_id: bool) -> String {
        let props: Vec<&str> = self
            .entity
            .properties
            .iter()
            .filter(|p| p.insertable)
            .filter(|p| with_id || !self.entity.id.contains(&p.name))
            .map(|p| p.name.as_str())
            .collect();
        let cols: Vec<String> = props.iter().map(|p| self.column(p)).collect();
        let vals: Vec<String> = props.iter().map(|p| format!(":{p}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            cols.join(", "),
            vals.join(", ")
        )
    }

    fn select_by_id(&self) -> String {
        let cols: Vec<String> = self
            .entity
            .properties
            .iter()
            .map(|p| p.column_name(self.naming))
            .collect();
        format!("SELECT {} FROM {} WHERE {}", cols.join(", "), self.table, self.where_id())
    }

    fn exists(&self) -> String {
        format!("SELECT 1 FROM {} WHERE {}", self.table, self.where_id())
    }

    fn update(&self) -> Option<String> {
        let sets: Vec<String> = self
            .entity
            .properties
            .iter()
            .filter(|p| p.updatable && !self.entity.id.contains(&p.name))
            .map(|p| format!("{} = :{}", p.column_name(self.naming), p.name))
            .collect();
        if sets.is_empty() {
            return None;
        }
        Some(format!(
            "UPDATE {} SET {} WHERE {}",
            self.table,
            sets.join(", "),
            self.where_id()
        ))
    }

    fn delete(&self) -> String {
        format!("DELETE FROM {} WHERE {}", self.table, self.where_id())
    }

    fn count(&self) -> String {
        format!("SELECT count(*) FROM {}", self.table)
    }
}

fn descriptor(
    sql: String,
    verb: Verb,
    kind: OperationKind,
    fetch_size: Option<u32>,
    batch_size: usize,
) -> Result<QueryDescriptor> {
    Ok(QueryDescriptor {
        sql: ParsedSql::parse(&sql)?,
        query_timeout: None,
        fetch_size,
        is_batch: false,
        batch_size,
        verb,
        kind,
        named: true,
        single_parameter: false,
    })
}

fn names(q: &QueryDescriptor) -> Vec<String> {
    q.sql.distinct_names().into_iter().map(str::to_string).collect()
}

fn structured(q: &QueryDescriptor, bulk: bool) -> ParameterBinding {
    let mut b = ParameterBinding::structured(0, names(q));
    if bulk {
        b.shape = BindingShape::Bulk {
            arg: 0,
            item: ItemBinding::Structured,
        };
    }
    b
}

/// Binding of an identifier argument (scalar id or composite id map).
fn by_id(entity: &EntityDescriptor, q: &QueryDescriptor, bulk: bool) -> ParameterBinding {
    let mut b = ParameterBinding::structured(0, names(q));
    b.shape = match (entity.id.as_slice(), bulk) {
        ([single], false) => BindingShape::Named {
            bindings: vec![(single.clone(), 0)],
        },
        ([single], true) => BindingShape::Bulk {
            arg: 0,
            item: ItemBinding::Named(single.clone()),
        },
        (_, false) => BindingShape::CompositeId { arg: 0 },
        (_, true) => BindingShape::Bulk {
            arg: 0,
            item: ItemBinding::Structured,
        },
    };
    b
}

/// Declaration of a synthesized operation with its default shapes.
fn default_decl(name: &str, entity: &EntityDescriptor, id: &TypeShape) -> MethodDecl {
    let e = TypeShape::entity(&entity.name);
    let keyless = entity.is_keyless();
    match name {
        INSERT => MethodDecl::new(name, if keyless { TypeShape::Unit } else { id.clone() }).arg(e),
        BATCH_INSERT => MethodDecl::new(
            name,
            if keyless {
                TypeShape::Unit
            } else {
                TypeShape::list(id.clone())
            },
        )
        .arg(TypeShape::list(e)),
        GET => MethodDecl::new(name, TypeShape::optional(e)).arg(id.clone()),
        EXISTS => MethodDecl::new(name, TypeShape::Bool).arg(id.clone()),
        UPDATE | DELETE => MethodDecl::new(name, TypeShape::i32()).arg(e),
        BATCH_UPDATE => MethodDecl::new(name, TypeShape::i32()).arg(TypeShape::list(e)),
        DELETE_BY_ID => MethodDecl::new(name, TypeShape::i32()).arg(id.clone()),
        BATCH_DELETE_BY_IDS => {
            MethodDecl::new(name, TypeShape::i32()).arg(TypeShape::list(id.clone()))
        }
        _ => MethodDecl::new(name, TypeShape::i64()),
    }
}

/// Build the declaration and plan of synthesized operation `name`.
/// `declared` is the interface's own declaration of the same name, if any;
/// its return shape and decorators win, its parameters must line up.
pub fn synthesize(
    interface: &InterfaceDecl,
    name: &str,
    declared: Option<&MethodDecl>,
    cfg: &DaoConfig,
) -> Result<(MethodDecl, MethodPlan)> {
    let entity = interface.entity.as_ref().ok_or_else(|| {
        Error::config(format!(
            "operation '{name}' of interface '{}' needs an entity",
            interface.name
        ))
    })?;
    if entity.is_keyless() && KEYED_ONLY.contains(&name) {
        return Err(Error::config(format!(
            "operation '{name}' needs an id, but entity {} has no id property",
            entity.name
        )));
    }
    let id_shape = interface.id_shape.clone().unwrap_or(TypeShape::Any);
    let template = default_decl(name, entity, &id_shape);
    let decl = match declared {
        None => template,
        Some(d) => {
            let mut d = d.clone();
            if d.params.is_empty() {
                d.params = template.params.clone();
            } else if d.params.len() != template.params.len() {
                return Err(Error::config(format!(
                    "operation '{name}' takes {} parameters, {} declared",
                    template.params.len(),
                    d.params.len()
                )));
            }
            d.params = d
                .params
                .into_iter()
                .zip(template.params.iter())
                .map(|(mine, default)| ParamDecl {
                    shape: default.shape.clone(),
                    ..mine
                })
                .collect();
            d
        }
    };

    let sql = Sql::new(entity, interface.naming);
    let batch_size = cfg.default_batch_size;
    let e_name = entity.name.clone();

    let body = match name {
        INSERT | BATCH_INSERT => {
            let bulk = name == BATCH_INSERT;
            let with_id = descriptor(sql.insert(true), Verb::Insert, OperationKind::Default, None, batch_size)?;
            let without_id = if entity.id.len() == 1 {
                Some(descriptor(
                    sql.insert(false),
                    Verb::Insert,
                    OperationKind::Default,
                    None,
                    batch_size,
                )?)
            } else {
                None
            };
            let id = id_return(&decl, Some(entity), bulk)?;
            PlanBody::EntityInsert {
                binding: structured(&with_id, bulk),
                with_id,
                without_id,
                id,
            }
        }
        GET => {
            let q = descriptor(sql.select_by_id(), Verb::Select, OperationKind::Get, Some(2), batch_size)?;
            let optional = matches!(decl.returns, TypeShape::Optional(_));
            PlanBody::Read {
                binding: by_id(entity, &q, false),
                query: q,
                action: ReadAction::Unique {
                    row: RowConversion::Entity(e_name),
                    optional,
                },
            }
        }
        EXISTS => {
            let q = descriptor(sql.exists(), Verb::Select, OperationKind::Exists, Some(1), batch_size)?;
            PlanBody::Read {
                binding: by_id(entity, &q, false),
                query: q,
                action: ReadAction::Exists,
            }
        }
        UPDATE | BATCH_UPDATE => {
            let text = sql.update().ok_or_else(|| {
                Error::config(format!("entity {} has no updatable properties", entity.name))
            })?;
            let q = descriptor(text, Verb::Update, OperationKind::Default, None, batch_size)?;
            let bulk = name == BATCH_UPDATE;
            let count = count_return(&decl)?;
            PlanBody::Write {
                binding: structured(&q, bulk),
                query: q,
                action: if bulk {
                    WriteAction::BatchUpdate { count }
                } else {
                    WriteAction::Update { count }
                },
            }
        }
        DELETE => {
            let q = descriptor(sql.delete(), Verb::Delete, OperationKind::Default, None, batch_size)?;
            PlanBody::Write {
                binding: structured(&q, false),
                query: q,
                action: WriteAction::Update {
                    count: count_return(&decl)?,
                },
            }
        }
        DELETE_BY_ID | BATCH_DELETE_BY_IDS => {
            let bulk = name == BATCH_DELETE_BY_IDS;
            let q = descriptor(sql.delete(), Verb::Delete, OperationKind::Default, None, batch_size)?;
            let count = count_return(&decl)?;
            PlanBody::Write {
                binding: by_id(entity, &q, bulk),
                query: q,
                action: if bulk {
                    WriteAction::BatchUpdate { count }
                } else {
                    WriteAction::Update { count }
                },
            }
        }
        COUNT => {
            let q = descriptor(sql.count(), Verb::Select, OperationKind::QueryForSingle, None, batch_size)?;
            let shape = match &decl.returns {
                TypeShape::Int(_) => decl.returns.clone(),
                other => {
                    return Err(Error::config(format!("count cannot return {other}")));
                }
            };
            PlanBody::Read {
                binding: ParameterBinding::none(),
                query: q,
                action: ReadAction::Single {
                    shape,
                    optional: false,
                },
            }
        }
        other => {
            return Err(Error::config(format!("'{other}' is not a synthesized operation")));
        }
    };

    let plan = MethodPlan {
        id: MethodId::new(&interface.name, name),
        returns: decl.returns.clone(),
        entity: Some(entity.clone()),
        naming: interface.naming,
        log: statement_log(&decl, interface, cfg),
        body,
    };
    tracing::debug!(method = %plan.id, "synthesized CRUD operation");
    Ok((decl, plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use daoplan_core::decl::PropertyDecl;

    fn accounts() -> InterfaceDecl {
        InterfaceDecl::new("AccountDao")
            .entity(
                EntityDescriptor::new("Account")
                    .property(PropertyDecl::new("id", TypeShape::i64()))
                    .property(PropertyDecl::new("firstName", TypeShape::Str))
                    .property(PropertyDecl::new("createdAt", TypeShape::i64()).read_only())
                    .id_property("id"),
            )
            .crud(TypeShape::i64())
    }

    fn text(plan: &MethodPlan) -> &str {
        plan.query().expect("query").text()
    }

    #[test]
    fn sql_follows_the_naming_policy() {
        let i = accounts();
        let cfg = DaoConfig::default();
        let (_, insert) = synthesize(&i, INSERT, None, &cfg).expect("insert");
        assert_eq!(
            text(&insert),
            "INSERT INTO account (id, first_name) VALUES (:id, :firstName)"
        );
        match &insert.body {
            PlanBody::EntityInsert { without_id, .. } => assert_eq!(
                without_id.as_ref().map(|q| q.text()),
                Some("INSERT INTO account (first_name) VALUES (:firstName)")
            ),
            other => panic!("unexpected body {other:?}"),
        }

        let (_, get) = synthesize(&i, GET, None, &cfg).expect("get");
        assert_eq!(
            text(&get),
            "SELECT id, first_name, created_at FROM account WHERE id = :id"
        );
        assert_eq!(get.query().and_then(|q| q.fetch_size), Some(2));

        let (_, update) = synthesize(&i, UPDATE, None, &cfg).expect("update");
        assert_eq!(text(&update), "UPDATE account SET first_name = :firstName WHERE id = :id");

        let (_, count) = synthesize(&i, COUNT, None, &cfg).expect("count");
        assert_eq!(text(&count), "SELECT count(*) FROM account");
    }

    #[test]
    fn id_type_must_match_the_entity() {
        let mut i = accounts();
        assert!(validate_entity(&i).is_ok());
        i.id_shape = Some(TypeShape::Str);
        assert!(validate_entity(&i).unwrap_err().is_config());

        let mut i = accounts();
        if let Some(e) = i.entity.as_mut() {
            e.id = vec!["uuid".into()];
        }
        let err = validate_entity(&i).unwrap_err();
        assert!(err.to_string().contains("uuid"));
    }

    #[test]
    fn keyless_entities_only_insert_and_count() {
        let i = InterfaceDecl::new("LogDao")
            .entity(EntityDescriptor::new("Log").property(PropertyDecl::new("message", TypeShape::Str)))
            .crud(TypeShape::i64());
        let entity = i.entity.clone().expect("entity");
        assert_eq!(available_operations(&entity), vec![INSERT, BATCH_INSERT, COUNT]);
        assert!(synthesize(&i, GET, None, &DaoConfig::default()).is_err());

        let declared = MethodDecl::new(INSERT, TypeShape::i64());
        let err = synthesize(&i, INSERT, Some(&declared), &DaoConfig::default()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn batch_delete_binds_each_id_by_name() {
        let (decl, plan) =
            synthesize(&accounts(), BATCH_DELETE_BY_IDS, None, &DaoConfig::default()).expect("plan");
        assert_eq!(decl.params[0].shape, TypeShape::list(TypeShape::i64()));
        assert_eq!(
            plan.binding().map(|b| b.shape.clone()),
            Some(BindingShape::Bulk {
                arg: 0,
                item: ItemBinding::Named("id".into())
            })
        );
    }
}
