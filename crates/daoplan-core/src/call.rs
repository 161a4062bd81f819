//! Call-time arguments and outputs of a dispatched DAO method.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{Row, RowSet, Value};

/// Maps one row to a value (e.g. an entity, a scalar, or a tuple-like list).
pub type RowMapperFn = Arc<dyn Fn(Row<'_>) -> Result<Value> + Send + Sync>;
/// Consumes a whole row set and produces one value.
pub type ResultExtractorFn = Arc<dyn Fn(&RowSet) -> Result<Value> + Send + Sync>;
/// Keeps or drops a row before mapping.
pub type RowFilterFn = Arc<dyn Fn(Row<'_>) -> bool + Send + Sync>;

/// One positional argument of a DAO call.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    RowMapper(RowMapperFn),
    ResultExtractor(ResultExtractorFn),
    RowFilter(RowFilterFn),
}

impl Arg {
    pub fn value(v: impl Into<Value>) -> Self {
        Arg::Value(v.into())
    }

    pub fn mapper(f: impl Fn(Row<'_>) -> Result<Value> + Send + Sync + 'static) -> Self {
        Arg::RowMapper(Arc::new(f))
    }

    pub fn extractor(f: impl Fn(&RowSet) -> Result<Value> + Send + Sync + 'static) -> Self {
        Arg::ResultExtractor(Arc::new(f))
    }

    pub fn filter(f: impl Fn(Row<'_>) -> bool + Send + Sync + 'static) -> Self {
        Arg::RowFilter(Arc::new(f))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_callback(&self) -> bool {
        !matches!(self, Arg::Value(_))
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Arg::RowMapper(_) => f.write_str("RowMapper(..)"),
            Arg::ResultExtractor(_) => f.write_str("ResultExtractor(..)"),
            Arg::RowFilter(_) => f.write_str("RowFilter(..)"),
        }
    }
}

impl<T: Into<Value>> From<T> for Arg {
    fn from(v: T) -> Self {
        Arg::Value(v.into())
    }
}

/// Pull-based sequence of mapped rows. Dropping it releases whatever the
/// producer holds, whether or not it was fully consumed.
pub struct RowStream {
    inner: Box<dyn Iterator<Item = Result<Value>> + Send>,
}

impl RowStream {
    pub fn new(inner: impl Iterator<Item = Result<Value>> + Send + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Drain the stream, stopping at the first error.
    pub fn collect_values(self) -> Result<Vec<Value>> {
        self.collect()
    }
}

impl Iterator for RowStream {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowStream(..)")
    }
}

/// What a dispatched method returns.
#[derive(Debug)]
pub enum Output {
    Unit,
    Value(Value),
    RowSet(RowSet),
    Stream(RowStream),
}

impl Output {
    pub fn into_value(self) -> Result<Value> {
        match self {
            Output::Unit => Ok(Value::Null),
            Output::Value(v) => Ok(v),
            Output::RowSet(_) => Err(Error::TypeMismatch(
                "method returns a row set, not a value".into(),
            )),
            Output::Stream(_) => Err(Error::TypeMismatch(
                "method returns a stream, not a value".into(),
            )),
        }
    }

    pub fn into_rowset(self) -> Result<RowSet> {
        match self {
            Output::RowSet(rs) => Ok(rs),
            _ => Err(Error::TypeMismatch("method does not return a row set".into())),
        }
    }

    pub fn into_stream(self) -> Result<RowStream> {
        match self {
            Output::Stream(s) => Ok(s),
            _ => Err(Error::TypeMismatch("method does not return a stream".into())),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Copy of a materialized output; streams cannot be copied.
    pub fn try_clone(&self) -> Option<Output> {
        match self {
            Output::Unit => Some(Output::Unit),
            Output::Value(v) => Some(Output::Value(v.clone())),
            Output::RowSet(rs) => Some(Output::RowSet(rs.clone())),
            Output::Stream(_) => None,
        }
    }
}
