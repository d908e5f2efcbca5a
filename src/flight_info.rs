//! Schema inference from a read job's first record.
//!
//! One exhaustive match maps the row value's `LogicalType` onto an
//! Arrow `DataType`.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::errors::Error;
use crate::value::{LogicalType, Value};

/// Infers a wire schema from the first record of a read job. Nullable
/// is permissive (`true`) for every field: a single sample cannot prove
/// a column will never carry a null later in the stream.
pub fn infer_schema(first_row: &[(String, Value)]) -> Result<SchemaRef, Error> {
    let fields = first_row
        .iter()
        .map(|(name, value)| infer_field(name, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

fn infer_field(name: &str, value: &Value) -> Result<Field, Error> {
    let dtype = match value.logical_type() {
        LogicalType::Int32 => DataType::Int32,
        LogicalType::Int64 => DataType::Int64,
        LogicalType::Float32 => DataType::Float32,
        LogicalType::Float64 => DataType::Float64,
        LogicalType::String => DataType::Utf8,
        LogicalType::IntArray => fixed_size_list(DataType::Int32, value)?,
        LogicalType::LongArray => fixed_size_list(DataType::Int64, value)?,
        LogicalType::FloatArray => fixed_size_list(DataType::Float32, value)?,
        LogicalType::DoubleArray => fixed_size_list(DataType::Float64, value)?,
        LogicalType::List => {
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true)))
        }
        LogicalType::Object | LogicalType::Null => {
            return Err(Error::InvalidArgument(format!(
                "field '{name}' has unsupported logical type {:?} for schema inference",
                value.logical_type()
            )))
        }
    };
    Ok(Field::new(name, dtype, true))
}

fn fixed_size_list(element: DataType, value: &Value) -> Result<DataType, Error> {
    let stride = value
        .arity()
        .expect("array-typed logical type always reports an arity") as i32;
    Ok(DataType::FixedSizeList(
        Arc::new(Field::new("item", element, true)),
        stride,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_fields_map_to_primitive_types() {
        let row = vec![
            ("id".to_string(), Value::Int64(1)),
            ("name".to_string(), Value::String("a".to_string())),
        ];
        let schema = infer_schema(&row).unwrap();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
    }

    #[test]
    fn array_field_becomes_fixed_size_list_with_observed_stride() {
        let row = vec![(
            "vec".to_string(),
            Value::DoubleArray(vec![1.0, 2.0, 3.0]),
        )];
        let schema = infer_schema(&row).unwrap();
        match schema.field(0).data_type() {
            DataType::FixedSizeList(_, stride) => assert_eq!(*stride, 3),
            other => panic!("expected FixedSizeList, got {other:?}"),
        }
    }

    #[test]
    fn object_type_is_invalid_argument() {
        let row = vec![(
            "blob".to_string(),
            Value::Object(crate::value::serde_placeholder::Object(Default::default())),
        )];
        assert!(matches!(
            infer_schema(&row).unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }
}
