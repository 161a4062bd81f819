//! Result conversions: rows to values, counts to return shapes, ids.

use daoplan_core::call::{Output, RowMapperFn};
use daoplan_core::decl::EntityDescriptor;
use daoplan_core::error::{Error, Result};
use daoplan_core::naming::NamingPolicy;
use daoplan_core::shape::TypeShape;
use daoplan_core::value::{Record, Row, Value};
use daoplan_planner::{CountReturn, IdReturn, RowConversion};

/// What a row conversion may need besides the row itself.
#[derive(Clone)]
pub struct RowContext {
    pub entity: Option<EntityDescriptor>,
    pub naming: NamingPolicy,
    pub mapper: Option<RowMapperFn>,
}

impl RowContext {
    pub fn convert(&self, row: Row<'_>, conv: &RowConversion) -> Result<Value> {
        match conv {
            RowConversion::Mapper => match &self.mapper {
                Some(f) => f(row),
                None => Err(Error::Invariant("row mapper argument missing".into())),
            },
            RowConversion::Entity(name) => Ok(self.entity_from_row(name, row)),
            RowConversion::Map => Ok(Value::Map(row.to_map())),
            RowConversion::Scalar(shape) => coerce(row.get(0).cloned().unwrap_or(Value::Null), shape),
            RowConversion::Values => Ok(Value::List(row.values().to_vec())),
        }
    }

    fn entity_from_row(&self, name: &str, row: Row<'_>) -> Value {
        let mut rec = Record::new(name);
        match self.entity.as_ref().filter(|e| e.name == name) {
            Some(e) => {
                for (col, v) in row.columns().iter().zip(row.values()) {
                    if let Some(p) = e.property_for_column(col, self.naming) {
                        rec.set(p.name.clone(), v.clone());
                    }
                }
            }
            None => {
                for (col, v) in row.columns().iter().zip(row.values()) {
                    let prop = NamingPolicy::LowerCamelCase.apply(&col.to_ascii_lowercase());
                    rec.set(prop, v.clone());
                }
            }
        }
        Value::entity(rec)
    }
}

/// Coerce a column value to a declared scalar shape. NULL passes through.
pub fn coerce(value: Value, shape: &TypeShape) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = |v: &Value| {
        Error::TypeMismatch(format!("cannot convert {} value {v:?} to {shape}", v.kind_name()))
    };
    match shape {
        TypeShape::Optional(inner) => coerce(value, inner),
        TypeShape::Bool => value.as_bool().map(Value::Bool).ok_or_else(|| mismatch(&value)),
        TypeShape::Int(w) => {
            let n = value.as_i64().ok_or_else(|| mismatch(&value))?;
            let (lo, hi) = w.bounds();
            if n < lo || n > hi {
                return Err(Error::TypeMismatch(format!("{n} is out of range for {shape}")));
            }
            Ok(Value::Int(n))
        }
        TypeShape::Float => value.as_f64().map(Value::Float).ok_or_else(|| mismatch(&value)),
        TypeShape::Str => match value {
            Value::Str(_) => Ok(value),
            Value::Int(i) => Ok(Value::Str(i.to_string())),
            Value::Float(f) => Ok(Value::Str(f.to_string())),
            Value::Bool(b) => Ok(Value::Str(b.to_string())),
            other => Err(mismatch(&other)),
        },
        TypeShape::Bytes => match value {
            Value::Bytes(_) => Ok(value),
            Value::Str(s) => Ok(Value::Bytes(s.into_bytes())),
            other => Err(mismatch(&other)),
        },
        _ => Ok(value),
    }
}

/// Value returned by a non-optional scalar read that found nothing.
pub fn default_of(shape: &TypeShape) -> Value {
    match shape {
        TypeShape::Bool => Value::Bool(false),
        TypeShape::Int(_) => Value::Int(0),
        TypeShape::Float => Value::Float(0.0),
        _ => Value::Null,
    }
}

/// Update count in the declared return shape.
pub fn count_output(count: u64, conv: CountReturn) -> Result<Output> {
    match conv {
        CountReturn::Discard => Ok(Output::Unit),
        CountReturn::Bool => Ok(Output::Value(Value::Bool(count > 0))),
        CountReturn::Int(w) => {
            let (_, hi) = w.bounds();
            if count > hi as u64 {
                return Err(Error::TypeMismatch(format!(
                    "update count {count} does not fit the declared return type"
                )));
            }
            Ok(Output::Value(Value::Int(count as i64)))
        }
    }
}

/// Identifier of one inserted item. A generated key is written back onto an
/// entity whose id is still unset; otherwise the item's own id is used.
pub fn inserted_id(
    item: &Value,
    generated: Option<&Value>,
    entity: Option<&EntityDescriptor>,
) -> Result<Value> {
    let Some(e) = entity else {
        return Ok(generated.cloned().unwrap_or(Value::Null));
    };
    match e.id.as_slice() {
        [] => Ok(Value::Null),
        [single] => {
            let current = item.member(single).unwrap_or(Value::Null);
            match generated {
                Some(key) if current.is_default() => {
                    let key = match e.find(single) {
                        Some(p) => coerce(key.clone(), &p.shape)?,
                        None => key.clone(),
                    };
                    if let (Value::Entity(handle), true) = (item, e.id_writable) {
                        handle.set(single, key.clone());
                    }
                    Ok(key)
                }
                _ => Ok(current),
            }
        }
        composite => Ok(Value::Map(
            composite
                .iter()
                .map(|n| (n.clone(), item.member(n).unwrap_or(Value::Null)))
                .collect(),
        )),
    }
}

/// Insert result in the declared id shape.
pub fn id_value(id: Value, ret: &IdReturn) -> Result<Value> {
    match ret {
        IdReturn::Discard => Ok(Value::Null),
        IdReturn::Id(shape) => coerce(id, shape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daoplan_core::decl::PropertyDecl;
    use daoplan_core::shape::IntWidth;
    use daoplan_core::value::RowSet;

    fn account() -> EntityDescriptor {
        EntityDescriptor::new("Account")
            .property(PropertyDecl::new("id", TypeShape::i64()))
            .property(PropertyDecl::new("firstName", TypeShape::Str))
            .id_property("id")
    }

    fn ctx() -> RowContext {
        RowContext {
            entity: Some(account()),
            naming: NamingPolicy::default(),
            mapper: None,
        }
    }

    #[test]
    fn rows_become_entities_by_column_name() {
        let mut rs = RowSet::new(vec!["ID".into(), "first_name".into(), "extra".into()]);
        rs.rows.push(vec![Value::Int(4), "ada".into(), Value::Bool(true)]);
        let v = ctx()
            .convert(rs.row(0).expect("row"), &RowConversion::Entity("Account".into()))
            .expect("entity");
        assert_eq!(v.member("firstName"), Some(Value::from("ada")));
        assert_eq!(v.member("extra"), None);

        let other = ctx()
            .convert(rs.row(0).expect("row"), &RowConversion::Entity("Audit".into()))
            .expect("generic");
        assert_eq!(other.member("firstName"), Some(Value::from("ada")));
        assert_eq!(other.member("id"), Some(Value::Int(4)));
    }

    #[test]
    fn counts_are_range_checked() {
        assert!(matches!(count_output(3, CountReturn::Bool), Ok(Output::Value(Value::Bool(true)))));
        assert!(matches!(count_output(0, CountReturn::Discard), Ok(Output::Unit)));
        assert!(count_output(300, CountReturn::Int(IntWidth::I8)).is_err());
        assert!(matches!(
            count_output(127, CountReturn::Int(IntWidth::I8)),
            Ok(Output::Value(Value::Int(127)))
        ));
    }

    #[test]
    fn generated_ids_are_written_back_only_when_unset() {
        let e = account();
        let fresh = Value::entity(Record::new("Account").with("id", 0i64));
        let id = inserted_id(&fresh, Some(&Value::Int(9)), Some(&e)).expect("id");
        assert_eq!(id, Value::Int(9));
        assert_eq!(fresh.member("id"), Some(Value::Int(9)));

        let preset = Value::entity(Record::new("Account").with("id", 5i64));
        assert_eq!(inserted_id(&preset, None, Some(&e)).expect("id"), Value::Int(5));
        assert_eq!(inserted_id(&preset, Some(&Value::Int(9)), Some(&e)).expect("id"), Value::Int(5));
    }

    #[test]
    fn scalars_coerce_and_default() {
        assert_eq!(coerce("12".into(), &TypeShape::i32()).expect("int"), Value::Int(12));
        assert!(coerce(Value::Int(i64::MAX), &TypeShape::i32()).is_err());
        assert_eq!(coerce(Value::Int(1), &TypeShape::Bool).expect("bool"), Value::Bool(true));
        assert_eq!(default_of(&TypeShape::Float), Value::Float(0.0));
        assert_eq!(default_of(&TypeShape::Str), Value::Null);
    }
}
