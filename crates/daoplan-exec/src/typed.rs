//! Typed access on top of the dynamic dispatch table.
//!
//! `dao_struct!` declares a struct whose methods forward to a bound `Dao`
//! and convert the output with `FromOutput`.

use daoplan_core::call::{Output, RowStream};
use daoplan_core::error::{Error, Result};
use daoplan_core::value::{Record, RowSet, Value};
use serde::de::DeserializeOwned;

/// Conversion from a dispatched method's output.
pub trait FromOutput: Sized {
    fn from_output(out: Output) -> Result<Self>;
}

/// Conversion from one dynamic value.
pub trait FromValue: Sized {
    fn from_value(v: Value) -> Result<Self>;
}

fn mismatch<T>(v: &Value, want: &str) -> Result<T> {
    Err(Error::TypeMismatch(format!("expected {want}, got {} {v:?}", v.kind_name())))
}

impl FromValue for Value {
    fn from_value(v: Value) -> Result<Self> {
        Ok(v)
    }
}

impl FromValue for bool {
    fn from_value(v: Value) -> Result<Self> {
        match v.as_bool() {
            Some(b) => Ok(b),
            None => mismatch(&v, "bool"),
        }
    }
}

macro_rules! int_from_value {
    ($($t:ty),*) => {
        $(impl FromValue for $t {
            fn from_value(v: Value) -> Result<Self> {
                let Some(n) = v.as_i64() else {
                    return mismatch(&v, stringify!($t));
                };
                <$t>::try_from(n).map_err(|_| {
                    Error::TypeMismatch(format!("{n} is out of range for {}", stringify!($t)))
                })
            }
        })*
    };
}

int_from_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(v: Value) -> Result<Self> {
        match v.as_f64() {
            Some(f) => Ok(f),
            None => mismatch(&v, "f64"),
        }
    }
}

impl FromValue for String {
    fn from_value(v: Value) -> Result<Self> {
        match v {
            Value::Str(s) => Ok(s),
            other => mismatch(&other, "string"),
        }
    }
}

impl FromValue for Record {
    fn from_value(v: Value) -> Result<Self> {
        match v {
            Value::Entity(h) => Ok(h.snapshot()),
            Value::Map(m) => {
                let mut rec = Record::new("");
                for (k, v) in m {
                    rec.set(k, v);
                }
                Ok(rec)
            }
            other => mismatch(&other, "entity"),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(v: Value) -> Result<Self> {
        match v {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(v: Value) -> Result<Self> {
        match v {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            Value::Null => Ok(Vec::new()),
            other => mismatch(&other, "list"),
        }
    }
}

/// Any serde type, converted through its JSON form.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromValue for Json<T> {
    fn from_value(v: Value) -> Result<Self> {
        v.into_serde().map(Json)
    }
}

macro_rules! output_via_value {
    ($($t:ty),*) => {
        $(impl FromOutput for $t {
            fn from_output(out: Output) -> Result<Self> {
                <$t as FromValue>::from_value(out.into_value()?)
            }
        })*
    };
}

output_via_value!(Value, bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, f64, String, Record);

impl<T: FromValue> FromOutput for Option<T> {
    fn from_output(out: Output) -> Result<Self> {
        Option::<T>::from_value(out.into_value()?)
    }
}

impl<T: FromValue> FromOutput for Vec<T> {
    fn from_output(out: Output) -> Result<Self> {
        Vec::<T>::from_value(out.into_value()?)
    }
}

impl<T: DeserializeOwned> FromOutput for Json<T> {
    fn from_output(out: Output) -> Result<Self> {
        Json::<T>::from_value(out.into_value()?)
    }
}

impl FromOutput for () {
    fn from_output(out: Output) -> Result<Self> {
        match out {
            Output::Stream(_) => Err(Error::TypeMismatch("unexpected stream result".into())),
            _ => Ok(()),
        }
    }
}

impl FromOutput for RowSet {
    fn from_output(out: Output) -> Result<Self> {
        out.into_rowset()
    }
}

impl FromOutput for RowStream {
    fn from_output(out: Output) -> Result<Self> {
        out.into_stream()
    }
}

impl FromOutput for Output {
    fn from_output(out: Output) -> Result<Self> {
        Ok(out)
    }
}

/// Declare a typed facade over a bound `Dao`.
///
/// ```ignore
/// daoplan_exec::dao_struct! {
///     pub struct AccountDao {
///         fn findByName(name: &str) -> Option<Record>;
///         fn count() -> i64;
///     }
/// }
/// ```
#[macro_export]
macro_rules! dao_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( fn $method:ident ( $($arg:ident : $ty:ty),* $(,)? ) -> $ret:ty ; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            dao: ::std::sync::Arc<$crate::Dao>,
        }

        impl $name {
            pub fn new(dao: ::std::sync::Arc<$crate::Dao>) -> Self {
                Self { dao }
            }

            pub fn dao(&self) -> &$crate::Dao {
                &self.dao
            }

            $(
                #[allow(non_snake_case)]
                pub fn $method(&self, $($arg: $ty),*) -> $crate::Result<$ret> {
                    let args: ::std::vec::Vec<$crate::Arg> = ::std::vec![$($crate::Arg::from($arg)),*];
                    let out = self.dao.call(stringify!($method), &args)?;
                    <$ret as $crate::typed::FromOutput>::from_output(out)
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[test]
    fn values_convert_to_rust_types() {
        assert_eq!(i32::from_output(Output::Value(Value::Int(7))).expect("i32"), 7);
        assert!(i8::from_value(Value::Int(300)).is_err());
        assert_eq!(Option::<String>::from_value(Value::Null).expect("none"), None);
        assert_eq!(
            Vec::<i64>::from_value(Value::List(vec![Value::Int(1), Value::Int(2)])).expect("vec"),
            vec![1, 2]
        );
        assert!(String::from_value(Value::Int(1)).is_err());
        <()>::from_output(Output::Unit).expect("unit");
    }

    #[test]
    fn json_goes_through_serde() {
        let v = Value::Map(
            [("x".to_string(), Value::Int(1)), ("y".to_string(), Value::Int(2))]
                .into_iter()
                .collect(),
        );
        let Json(p) = Json::<Point>::from_value(v).expect("point");
        assert_eq!(p, Point { x: 1, y: 2 });
    }
}
