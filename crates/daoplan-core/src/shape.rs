//! Reflection-free description of parameter and return types.
//!
//! The planner decides everything about a method from its `TypeShape`s, so
//! shapes carry exactly the generic information that matters: element types of
//! collections and the output type of row mappers / result extractors.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
}

impl IntWidth {
    pub fn bounds(self) -> (i64, i64) {
        match self {
            IntWidth::I8 => (i8::MIN as i64, i8::MAX as i64),
            IntWidth::I16 => (i16::MIN as i64, i16::MAX as i64),
            IntWidth::I32 => (i32::MIN as i64, i32::MAX as i64),
            IntWidth::I64 => (i64::MIN, i64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeShape {
    Unit,
    Bool,
    Int(IntWidth),
    Float,
    Str,
    Bytes,
    /// Any scalar; converted from the first column as-is.
    Any,
    Optional(Box<TypeShape>),
    List(Box<TypeShape>),
    Set(Box<TypeShape>),
    /// Array-like argument whose elements are spread over placeholders.
    Slice(Box<TypeShape>),
    /// Lazily evaluated sequence.
    Stream(Box<TypeShape>),
    Entity(String),
    Map,
    /// Composite identifier (property name -> value).
    EntityId,
    RowSet,
    RowMapper(Box<TypeShape>),
    ResultExtractor(Box<TypeShape>),
    RowFilter,
}

impl TypeShape {
    pub fn i32() -> Self {
        TypeShape::Int(IntWidth::I32)
    }

    pub fn i64() -> Self {
        TypeShape::Int(IntWidth::I64)
    }

    pub fn entity(name: impl Into<String>) -> Self {
        TypeShape::Entity(name.into())
    }

    pub fn list(inner: TypeShape) -> Self {
        TypeShape::List(Box::new(inner))
    }

    pub fn set(inner: TypeShape) -> Self {
        TypeShape::Set(Box::new(inner))
    }

    pub fn slice(inner: TypeShape) -> Self {
        TypeShape::Slice(Box::new(inner))
    }

    pub fn optional(inner: TypeShape) -> Self {
        TypeShape::Optional(Box::new(inner))
    }

    pub fn stream(inner: TypeShape) -> Self {
        TypeShape::Stream(Box::new(inner))
    }

    pub fn row_mapper(out: TypeShape) -> Self {
        TypeShape::RowMapper(Box::new(out))
    }

    pub fn result_extractor(out: TypeShape) -> Self {
        TypeShape::ResultExtractor(Box::new(out))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, TypeShape::Unit)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, TypeShape::Bool)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, TypeShape::List(_) | TypeShape::Set(_))
    }

    /// Collections and slices: arguments that may carry many values.
    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            TypeShape::List(_) | TypeShape::Set(_) | TypeShape::Slice(_)
        )
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, TypeShape::Stream(_))
    }

    pub fn is_row_mapper(&self) -> bool {
        matches!(self, TypeShape::RowMapper(_))
    }

    pub fn is_result_extractor(&self) -> bool {
        matches!(self, TypeShape::ResultExtractor(_))
    }

    pub fn is_callback(&self) -> bool {
        matches!(
            self,
            TypeShape::RowMapper(_) | TypeShape::ResultExtractor(_) | TypeShape::RowFilter
        )
    }

    /// Entity, map, or composite id: bound property-by-property.
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            TypeShape::Entity(_) | TypeShape::Map | TypeShape::EntityId
        )
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            TypeShape::Bool
                | TypeShape::Int(_)
                | TypeShape::Float
                | TypeShape::Str
                | TypeShape::Bytes
                | TypeShape::Any
        )
    }

    /// Generic argument of a container or callback shape.
    pub fn element(&self) -> Option<&TypeShape> {
        match self {
            TypeShape::Optional(t)
            | TypeShape::List(t)
            | TypeShape::Set(t)
            | TypeShape::Slice(t)
            | TypeShape::Stream(t)
            | TypeShape::RowMapper(t)
            | TypeShape::ResultExtractor(t) => Some(t),
            _ => None,
        }
    }

    /// Whether a value of `other` can stand in for a value of `self`.
    /// `Any` accepts every scalar, which mirrors a supertype relation.
    pub fn accepts(&self, other: &TypeShape) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (TypeShape::Any, b) => b.is_scalar(),
            _ => false,
        }
    }

    /// Results that may be snapshotted into a cache.
    pub fn is_cacheable(&self) -> bool {
        !matches!(
            self,
            TypeShape::Unit
                | TypeShape::Stream(_)
                | TypeShape::RowMapper(_)
                | TypeShape::ResultExtractor(_)
                | TypeShape::RowFilter
        )
    }
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeShape::Unit => f.write_str("()"),
            TypeShape::Bool => f.write_str("bool"),
            TypeShape::Int(w) => write!(f, "{}", format!("{w:?}").to_lowercase()),
            TypeShape::Float => f.write_str("f64"),
            TypeShape::Str => f.write_str("String"),
            TypeShape::Bytes => f.write_str("Vec<u8>"),
            TypeShape::Any => f.write_str("Value"),
            TypeShape::Optional(t) => write!(f, "Option<{t}>"),
            TypeShape::List(t) => write!(f, "Vec<{t}>"),
            TypeShape::Set(t) => write!(f, "Set<{t}>"),
            TypeShape::Slice(t) => write!(f, "[{t}]"),
            TypeShape::Stream(t) => write!(f, "Stream<{t}>"),
            TypeShape::Entity(n) => f.write_str(n),
            TypeShape::Map => f.write_str("Map"),
            TypeShape::EntityId => f.write_str("EntityId"),
            TypeShape::RowSet => f.write_str("RowSet"),
            TypeShape::RowMapper(t) => write!(f, "RowMapper<{t}>"),
            TypeShape::ResultExtractor(t) => write!(f, "ResultExtractor<{t}>"),
            TypeShape::RowFilter => f.write_str("RowFilter"),
        }
    }
}
