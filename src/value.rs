//! Row value abstraction: a read-only view over one row of driver-native
//! data, exposed as a closed, tagged sum type.
//!
//! A row reader hands out values of a statically-known, closed set of
//! types without a trait object per cell — one enum rather than a
//! per-native-type accessor impl, since the value set here never grows
//! past this fixed list.

use crate::errors::Error;

/// A single row/column cell, tagged by its logical type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    List(Vec<Value>),
    Object(serde_placeholder::Object),
    Null,
}

/// A stand-in for an opaque, driver-specific structured value (the
/// `Object` variant). Kept crate-local rather than pulling in a JSON
/// dependency, since the service never needs to serialize it — only pass
/// it through to collaborators out of scope for this crate.
pub mod serde_placeholder {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Object(pub std::collections::BTreeMap<String, super::Value>);
}

/// The arity of an array/list-typed value; `None` for scalars.
impl Value {
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Int32(_) => LogicalType::Int32,
            Value::Int64(_) => LogicalType::Int64,
            Value::Float32(_) => LogicalType::Float32,
            Value::Float64(_) => LogicalType::Float64,
            Value::String(_) => LogicalType::String,
            Value::IntArray(_) => LogicalType::IntArray,
            Value::LongArray(_) => LogicalType::LongArray,
            Value::FloatArray(_) => LogicalType::FloatArray,
            Value::DoubleArray(_) => LogicalType::DoubleArray,
            Value::List(_) => LogicalType::List,
            Value::Object(_) => LogicalType::Object,
            Value::Null => LogicalType::Null,
        }
    }

    /// Arity for array/list-typed values, `None` for anything else.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Value::IntArray(v) => Some(v.len()),
            Value::LongArray(v) => Some(v.len()),
            Value::FloatArray(v) => Some(v.len()),
            Value::DoubleArray(v) => Some(v.len()),
            Value::List(v) => Some(v.len()),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Result<i32, Error> {
        match self {
            Value::Int32(v) => Ok(*v),
            other => Err(mismatch("INT32", other)),
        }
    }

    pub fn as_i64(&self) -> Result<i64, Error> {
        match self {
            Value::Int64(v) => Ok(*v),
            Value::Int32(v) => Ok(*v as i64),
            other => Err(mismatch("INT64", other)),
        }
    }

    pub fn as_f32(&self) -> Result<f32, Error> {
        match self {
            Value::Float32(v) => Ok(*v),
            other => Err(mismatch("FLOAT32", other)),
        }
    }

    pub fn as_f64(&self) -> Result<f64, Error> {
        match self {
            Value::Float64(v) => Ok(*v),
            Value::Float32(v) => Ok(*v as f64),
            other => Err(mismatch("FLOAT64", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            Value::String(v) => Ok(v.as_str()),
            other => Err(mismatch("STRING", other)),
        }
    }

    pub fn as_int_array(&self) -> Result<&[i32], Error> {
        match self {
            Value::IntArray(v) => Ok(v.as_slice()),
            other => Err(mismatch("INT_ARRAY", other)),
        }
    }

    pub fn as_long_array(&self) -> Result<&[i64], Error> {
        match self {
            Value::LongArray(v) => Ok(v.as_slice()),
            other => Err(mismatch("LONG_ARRAY", other)),
        }
    }

    pub fn as_float_array(&self) -> Result<&[f32], Error> {
        match self {
            Value::FloatArray(v) => Ok(v.as_slice()),
            other => Err(mismatch("FLOAT_ARRAY", other)),
        }
    }

    pub fn as_double_array(&self) -> Result<&[f64], Error> {
        match self {
            Value::DoubleArray(v) => Ok(v.as_slice()),
            other => Err(mismatch("DOUBLE_ARRAY", other)),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], Error> {
        match self {
            Value::List(v) => Ok(v.as_slice()),
            other => Err(mismatch("LIST", other)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn mismatch(expected: &str, found: &Value) -> Error {
    Error::TypeMismatch {
        expected: expected.to_string(),
        found: format!("{:?}", found.logical_type()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    IntArray,
    LongArray,
    FloatArray,
    DoubleArray,
    List,
    Object,
    Null,
}

/// Read-only view of one row. Implementations wrap driver-specific rows;
/// the trait is intentionally not `Send`/`Sync`-bound since the producer
/// only ever dispatches one row at a time per partition.
pub trait RowRecord {
    /// Ordered field names for this row's schema.
    fn keys(&self) -> &[String];

    fn get(&self, i: usize) -> Option<&Value>;

    fn get_named(&self, name: &str) -> Option<&Value> {
        let i = self.keys().iter().position(|k| k == name)?;
        self.get(i)
    }
}

/// A simple owned row, useful for tests and for collaborators that
/// materialize rows eagerly rather than streaming from a cursor.
#[derive(Debug, Clone)]
pub struct OwnedRow {
    keys: std::sync::Arc<Vec<String>>,
    values: Vec<Value>,
}

impl OwnedRow {
    pub fn new(keys: std::sync::Arc<Vec<String>>, values: Vec<Value>) -> Self {
        assert_eq!(keys.len(), values.len(), "row arity must match schema");
        OwnedRow { keys, values }
    }
}

impl RowRecord for OwnedRow {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn get(&self, i: usize) -> Option<&Value> {
        self.values.get(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_succeed_for_matching_type() {
        assert_eq!(Value::Int64(7).as_i64().unwrap(), 7);
        assert_eq!(Value::String("a".into()).as_str().unwrap(), "a");
    }

    #[test]
    fn widening_conversions_are_allowed() {
        assert_eq!(Value::Int32(3).as_i64().unwrap(), 3);
        assert_eq!(Value::Float32(1.5).as_f64().unwrap(), 1.5);
    }

    #[test]
    fn mismatched_conversion_is_typed_error() {
        let err = Value::String("x".into()).as_i64().unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn arity_reported_for_array_values() {
        assert_eq!(Value::IntArray(vec![1, 2, 3]).arity(), Some(3));
        assert_eq!(Value::Int32(1).arity(), None);
    }
}
