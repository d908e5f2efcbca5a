//! Column builders for the supported primitive and list/fixed-size-list
//! types.
//!
//! A plain enum dispatches to one of `arrow::array`'s concrete builders
//! per variant, rather than a macro-generated family of impls: the value
//! set here is closed, and the per-variant bookkeeping (fixed-size-list
//! stride, variable-list monotonic offsets) differs enough per type that
//! a shared macro would obscure more than it saves.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float32Builder, Float64Builder, Int32Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::DataType;

use crate::errors::Error;
use crate::mem::{Node, Reservation};
use crate::value::Value;

/// A built, transferred column chunk, ready to be handed to the flush
/// pipeline or appended into the batched column store. Ownership of the
/// payload is tied to `reservation`: dropping a `ColumnChunk` releases the
/// memory it was attributed to.
pub struct ColumnChunk {
    pub array: ArrayRef,
    pub reservation: Reservation,
}

impl ColumnChunk {
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn data_type(&self) -> &DataType {
        self.array.data_type()
    }
}

/// Rough per-value byte cost used for allocator accounting. Arrow's
/// growable buffers double internally; we account for the requested
/// capacity up front rather than tracking every internal reallocation.
fn bytes_per_value(dtype: &DataType) -> usize {
    match dtype {
        DataType::Int32 | DataType::Float32 => 4,
        DataType::Int64 | DataType::Float64 => 8,
        DataType::Utf8 => 16, // rough average; offsets + inline bytes
        DataType::FixedSizeList(field, stride) => {
            bytes_per_value(field.data_type()) * (*stride as usize)
        }
        DataType::List(field) => bytes_per_value(field.data_type()) * 4, // avg 4 elems/row guess
        _ => 8,
    }
}

pub enum ColumnBuilder {
    Int32 {
        builder: Int32Builder,
        reservation: Reservation,
        nullable: bool,
    },
    Int64 {
        builder: Int64Builder,
        reservation: Reservation,
        nullable: bool,
    },
    Float32 {
        builder: Float32Builder,
        reservation: Reservation,
        nullable: bool,
    },
    Float64 {
        builder: Float64Builder,
        reservation: Reservation,
        nullable: bool,
    },
    Utf8 {
        builder: StringBuilder,
        reservation: Reservation,
        nullable: bool,
    },
    FixedSizeListInt32 {
        values: Int32Builder,
        stride: usize,
        len: usize,
        reservation: Reservation,
        nullable: bool,
    },
    FixedSizeListInt64 {
        values: Int64Builder,
        stride: usize,
        len: usize,
        reservation: Reservation,
        nullable: bool,
    },
    FixedSizeListFloat32 {
        values: Float32Builder,
        stride: usize,
        len: usize,
        reservation: Reservation,
        nullable: bool,
    },
    FixedSizeListFloat64 {
        values: Float64Builder,
        stride: usize,
        len: usize,
        reservation: Reservation,
        nullable: bool,
    },
    /// Variable-size list of float64 elements, the only element type
    /// supported for this variant; other element types surface
    /// `InvalidArgument` at construction.
    VarListFloat64 {
        values: Float64Builder,
        offsets: Vec<i32>,
        validity: Vec<bool>,
        last_set: usize,
        reservation: Reservation,
        nullable: bool,
    },
}

impl ColumnBuilder {
    pub fn new_primitive(
        dtype: &DataType,
        nullable: bool,
        capacity: usize,
        alloc: &Node,
    ) -> Result<Self, Error> {
        let reservation = alloc.allocate(bytes_per_value(dtype) * capacity)?;
        Ok(match dtype {
            DataType::Int32 => ColumnBuilder::Int32 {
                builder: Int32Builder::with_capacity(capacity),
                reservation,
                nullable,
            },
            DataType::Int64 => ColumnBuilder::Int64 {
                builder: Int64Builder::with_capacity(capacity),
                reservation,
                nullable,
            },
            DataType::Float32 => ColumnBuilder::Float32 {
                builder: Float32Builder::with_capacity(capacity),
                reservation,
                nullable,
            },
            DataType::Float64 => ColumnBuilder::Float64 {
                builder: Float64Builder::with_capacity(capacity),
                reservation,
                nullable,
            },
            DataType::Utf8 => ColumnBuilder::Utf8 {
                builder: StringBuilder::with_capacity(capacity, capacity * 16),
                reservation,
                nullable,
            },
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported primitive column type {other:?}"
                )))
            }
        })
    }

    pub fn new_fixed_size_list(
        element: &DataType,
        stride: usize,
        nullable: bool,
        capacity: usize,
        alloc: &Node,
    ) -> Result<Self, Error> {
        let reservation =
            alloc.allocate(bytes_per_value(element) * stride * capacity)?;
        Ok(match element {
            DataType::Int32 => ColumnBuilder::FixedSizeListInt32 {
                values: Int32Builder::with_capacity(capacity * stride),
                stride,
                len: 0,
                reservation,
                nullable,
            },
            DataType::Int64 => ColumnBuilder::FixedSizeListInt64 {
                values: Int64Builder::with_capacity(capacity * stride),
                stride,
                len: 0,
                reservation,
                nullable,
            },
            DataType::Float32 => ColumnBuilder::FixedSizeListFloat32 {
                values: Float32Builder::with_capacity(capacity * stride),
                stride,
                len: 0,
                reservation,
                nullable,
            },
            DataType::Float64 => ColumnBuilder::FixedSizeListFloat64 {
                values: Float64Builder::with_capacity(capacity * stride),
                stride,
                len: 0,
                reservation,
                nullable,
            },
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported fixed-size-list element type {other:?}"
                )))
            }
        })
    }

    pub fn new_var_list_f64(nullable: bool, capacity: usize, alloc: &Node) -> Result<Self, Error> {
        let reservation = alloc.allocate(bytes_per_value(&DataType::Float64) * capacity * 4)?;
        Ok(ColumnBuilder::VarListFloat64 {
            values: Float64Builder::with_capacity(capacity * 4),
            offsets: vec![0],
            validity: Vec::with_capacity(capacity),
            last_set: 0,
            reservation,
            nullable,
        })
    }

    /// Appends `value` at `index`, which must equal the builder's current
    /// length. This is an indexed write in name only — the partitioned
    /// pool only ever writes sequentially, so this is validated rather
    /// than used for random access.
    pub fn set_safe(&mut self, index: usize, value: &Value) -> Result<(), Error> {
        debug_assert_eq!(index, self.len(), "setSafe must be called in row order");
        match self {
            ColumnBuilder::Int32 {
                builder, nullable, ..
            } => append_scalar(builder, *nullable, value, Value::as_i32),
            ColumnBuilder::Int64 {
                builder, nullable, ..
            } => append_scalar(builder, *nullable, value, Value::as_i64),
            ColumnBuilder::Float32 {
                builder, nullable, ..
            } => append_scalar(builder, *nullable, value, Value::as_f32),
            ColumnBuilder::Float64 {
                builder, nullable, ..
            } => append_scalar(builder, *nullable, value, Value::as_f64),
            ColumnBuilder::Utf8 {
                builder, nullable, ..
            } => {
                if value.is_null() {
                    if !*nullable {
                        return Err(Error::InvalidArgument(
                            "null written to non-nullable field".into(),
                        ));
                    }
                    builder.append_null();
                } else {
                    builder.append_value(value.as_str()?);
                }
                Ok(())
            }
            ColumnBuilder::FixedSizeListInt32 {
                values,
                stride,
                len,
                nullable,
                ..
            } => append_fixed_list(values, *stride, len, *nullable, value, |v| {
                v.as_int_array().map(|s| s.to_vec())
            }),
            ColumnBuilder::FixedSizeListInt64 {
                values,
                stride,
                len,
                nullable,
                ..
            } => append_fixed_list(values, *stride, len, *nullable, value, |v| {
                v.as_long_array().map(|s| s.to_vec())
            }),
            ColumnBuilder::FixedSizeListFloat32 {
                values,
                stride,
                len,
                nullable,
                ..
            } => append_fixed_list(values, *stride, len, *nullable, value, |v| {
                v.as_float_array().map(|s| s.to_vec())
            }),
            ColumnBuilder::FixedSizeListFloat64 {
                values,
                stride,
                len,
                nullable,
                ..
            } => append_fixed_list(values, *stride, len, *nullable, value, |v| {
                v.as_double_array().map(|s| s.to_vec())
            }),
            ColumnBuilder::VarListFloat64 {
                values,
                offsets,
                validity,
                last_set,
                nullable,
                ..
            } => {
                if value.is_null() {
                    if !*nullable {
                        return Err(Error::InvalidArgument(
                            "null written to non-nullable field".into(),
                        ));
                    }
                    validity.push(false);
                    offsets.push(*offsets.last().unwrap());
                } else {
                    let elems = value.as_list()?;
                    for e in elems {
                        values.append_value(e.as_f64()?);
                    }
                    let next = offsets.last().unwrap() + elems.len() as i32;
                    offsets.push(next);
                    validity.push(true);
                }
                *last_set = offsets.len() - 1;
                Ok(())
            }
        }
    }

    /// Current number of logical rows appended so far.
    pub fn len(&self) -> usize {
        match self {
            ColumnBuilder::Int32 { builder, .. } => builder.len(),
            ColumnBuilder::Int64 { builder, .. } => builder.len(),
            ColumnBuilder::Float32 { builder, .. } => builder.len(),
            ColumnBuilder::Float64 { builder, .. } => builder.len(),
            ColumnBuilder::Utf8 { builder, .. } => builder.len(),
            ColumnBuilder::FixedSizeListInt32 { len, .. }
            | ColumnBuilder::FixedSizeListInt64 { len, .. }
            | ColumnBuilder::FixedSizeListFloat32 { len, .. }
            | ColumnBuilder::FixedSizeListFloat64 { len, .. } => *len,
            ColumnBuilder::VarListFloat64 { offsets, .. } => offsets.len() - 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets the final logical value count before transfer. For fixed and
    /// variable-size lists this is a sanity check; arrow's eager builders
    /// already track length as values are appended.
    pub fn set_value_count(&self, n: usize) -> Result<(), Error> {
        if self.len() != n {
            return Err(Error::Internal(format!(
                "set_value_count({n}) does not match builder length {}",
                self.len()
            )));
        }
        Ok(())
    }

    /// Moves buffer ownership to `dest`, without copying, returning a
    /// `ColumnChunk`. The source builder becomes empty (value count zero)
    /// and may be reused.
    pub fn transfer_to(&mut self, dest: &Node) -> Result<ColumnChunk, Error> {
        macro_rules! finish_primitive {
            ($builder:expr, $reservation:expr) => {{
                let array: ArrayRef = Arc::new($builder.finish());
                let taken = std::mem::replace(
                    $reservation,
                    dest.allocate(0)?, // zero-size placeholder, swapped back below
                );
                let moved = taken.transfer_to(dest)?;
                ColumnChunk {
                    array,
                    reservation: moved,
                }
            }};
        }

        Ok(match self {
            ColumnBuilder::Int32 { builder, reservation, .. } => {
                finish_primitive!(builder, reservation)
            }
            ColumnBuilder::Int64 { builder, reservation, .. } => {
                finish_primitive!(builder, reservation)
            }
            ColumnBuilder::Float32 { builder, reservation, .. } => {
                finish_primitive!(builder, reservation)
            }
            ColumnBuilder::Float64 { builder, reservation, .. } => {
                finish_primitive!(builder, reservation)
            }
            ColumnBuilder::Utf8 { builder, reservation, .. } => {
                finish_primitive!(builder, reservation)
            }
            ColumnBuilder::FixedSizeListInt32 {
                values,
                stride,
                len,
                reservation,
                ..
            } => finish_fixed_list(values, *stride, len, reservation, dest)?,
            ColumnBuilder::FixedSizeListInt64 {
                values,
                stride,
                len,
                reservation,
                ..
            } => finish_fixed_list(values, *stride, len, reservation, dest)?,
            ColumnBuilder::FixedSizeListFloat32 {
                values,
                stride,
                len,
                reservation,
                ..
            } => finish_fixed_list(values, *stride, len, reservation, dest)?,
            ColumnBuilder::FixedSizeListFloat64 {
                values,
                stride,
                len,
                reservation,
                ..
            } => finish_fixed_list(values, *stride, len, reservation, dest)?,
            ColumnBuilder::VarListFloat64 {
                values,
                offsets,
                validity,
                last_set,
                reservation,
                ..
            } => {
                use arrow::array::ListArray;
                use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
                use arrow::datatypes::Field;

                let value_array: ArrayRef = Arc::new(values.finish());
                let offsets_buf =
                    OffsetBuffer::new(ScalarBuffer::from(std::mem::take(offsets)));
                let nulls = NullBuffer::from(std::mem::take(validity));
                let field = Arc::new(Field::new("item", DataType::Float64, true));
                let array = ListArray::new(field, offsets_buf, value_array, Some(nulls));
                *last_set = 0;

                let taken = std::mem::replace(reservation, dest.allocate(0)?);
                let moved = taken.transfer_to(dest)?;
                ColumnChunk {
                    array: Arc::new(array),
                    reservation: moved,
                }
            }
        })
    }
}

fn append_scalar<B, T>(
    builder: &mut B,
    nullable: bool,
    value: &Value,
    convert: impl Fn(&Value) -> Result<T, Error>,
) -> Result<(), Error>
where
    B: ScalarAppend<T>,
{
    if value.is_null() {
        if !nullable {
            return Err(Error::InvalidArgument(
                "null written to non-nullable field".into(),
            ));
        }
        builder.append_null();
        Ok(())
    } else {
        builder.append_value(convert(value)?);
        Ok(())
    }
}

/// Thin trait so `append_scalar` can be generic over the four numeric
/// arrow builder types without duplicating the null/non-null branch.
trait ScalarAppend<T> {
    fn append_value(&mut self, v: T);
    fn append_null(&mut self);
}

macro_rules! impl_scalar_append {
    ($builder:ty, $native:ty) => {
        impl ScalarAppend<$native> for $builder {
            fn append_value(&mut self, v: $native) {
                <$builder>::append_value(self, v);
            }
            fn append_null(&mut self) {
                <$builder>::append_null(self);
            }
        }
    };
}

impl_scalar_append!(Int32Builder, i32);
impl_scalar_append!(Int64Builder, i64);
impl_scalar_append!(Float32Builder, f32);
impl_scalar_append!(Float64Builder, f64);

fn append_fixed_list<B: ScalarAppend<T>, T>(
    values: &mut B,
    stride: usize,
    len: &mut usize,
    nullable: bool,
    value: &Value,
    extract: impl Fn(&Value) -> Result<Vec<T>, Error>,
) -> Result<(), Error> {
    if value.is_null() {
        if !nullable {
            return Err(Error::InvalidArgument(
                "null written to non-nullable field".into(),
            ));
        }
        for _ in 0..stride {
            values.append_null();
        }
    } else {
        let elems = extract(value)?;
        if elems.len() != stride {
            return Err(Error::InvalidArgument(format!(
                "fixed-size-list stride mismatch: schema stride {stride}, row has {}",
                elems.len()
            )));
        }
        for e in elems {
            values.append_value(e);
        }
    }
    *len += 1;
    Ok(())
}

fn finish_fixed_list<B>(
    values: &mut B,
    stride: usize,
    len: &mut usize,
    reservation: &mut Reservation,
    dest: &Node,
) -> Result<ColumnChunk, Error>
where
    B: FinishArray,
{
    use arrow::array::FixedSizeListArray;
    use arrow::datatypes::Field;

    let value_array = values.finish_array();
    let elem_field = Arc::new(Field::new("item", value_array.data_type().clone(), true));
    let array = FixedSizeListArray::try_new(elem_field, stride as i32, value_array, None)
        .map_err(Error::Arrow)?;
    *len = 0;

    let taken = std::mem::replace(reservation, dest.allocate(0)?);
    let moved = taken.transfer_to(dest)?;
    Ok(ColumnChunk {
        array: Arc::new(array),
        reservation: moved,
    })
}

trait FinishArray {
    fn finish_array(&mut self) -> ArrayRef;
}

macro_rules! impl_finish_array {
    ($builder:ty) => {
        impl FinishArray for $builder {
            fn finish_array(&mut self) -> ArrayRef {
                Arc::new(<$builder>::finish(self))
            }
        }
    };
}

impl_finish_array!(Int32Builder);
impl_finish_array!(Int64Builder);
impl_finish_array!(Float32Builder);
impl_finish_array!(Float64Builder);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Node;

    #[test]
    fn primitive_builder_round_trips_values() {
        let root = Node::root(None);
        let mut b =
            ColumnBuilder::new_primitive(&DataType::Int64, false, 4, &root).unwrap();
        b.set_safe(0, &Value::Int64(1)).unwrap();
        b.set_safe(1, &Value::Int64(2)).unwrap();
        assert_eq!(b.len(), 2);
        b.set_value_count(2).unwrap();
        let dest = root.new_child("dest", None);
        let chunk = b.transfer_to(&dest).unwrap();
        assert_eq!(chunk.len(), 2);
        assert_eq!(b.len(), 0, "source builder becomes empty after transfer");
    }

    #[test]
    fn fixed_size_list_stride_mismatch_is_invalid_argument() {
        let root = Node::root(None);
        let mut b =
            ColumnBuilder::new_fixed_size_list(&DataType::Float64, 3, false, 4, &root).unwrap();
        let err = b
            .set_safe(0, &Value::DoubleArray(vec![1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn fixed_size_list_with_matching_stride_builds() {
        let root = Node::root(None);
        let mut b =
            ColumnBuilder::new_fixed_size_list(&DataType::Float64, 3, false, 4, &root).unwrap();
        b.set_safe(0, &Value::DoubleArray(vec![1.0, 2.0, 3.0]))
            .unwrap();
        assert_eq!(b.len(), 1);
        let dest = root.new_child("dest", None);
        let chunk = b.transfer_to(&dest).unwrap();
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn var_list_offsets_are_monotonic() {
        let root = Node::root(None);
        let mut b = ColumnBuilder::new_var_list_f64(false, 4, &root).unwrap();
        b.set_safe(0, &Value::List(vec![Value::Float64(1.0), Value::Float64(2.0)]))
            .unwrap();
        b.set_safe(1, &Value::List(vec![Value::Float64(3.0)]))
            .unwrap();
        assert_eq!(b.len(), 2);
    }
}
