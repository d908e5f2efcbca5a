//! Write-side sink: accumulates transferred column chunks from incoming
//! record batches, then answers random-access lookups by absolute row
//! index.
//!
//! Accumulation is per-field (a `Vec<ColumnChunk>` per column) rather
//! than per-whole-batch, so `getByIndex` can watermark-skip straight to
//! the right chunk instead of scanning whole record batches.

use std::collections::HashMap;

use arrow::array::{Array, AsArray};
use arrow::datatypes::DataType;

use crate::errors::Error;
use crate::mem::Node;
use crate::value::Value;
use crate::vectors::ColumnChunk;

struct FieldColumn {
    chunks: Vec<ColumnChunk>,
    row_count: usize,
    /// Smallest chunk index with `len() < max_batch_size`, or `chunks.len()`
    /// if every chunk so far is full.
    watermark: usize,
    data_type: DataType,
}

impl FieldColumn {
    fn new(data_type: DataType) -> Self {
        FieldColumn {
            chunks: Vec::new(),
            row_count: 0,
            watermark: 0,
            data_type,
        }
    }

    fn push(&mut self, chunk: ColumnChunk, max_batch_size: usize) -> Result<(), Error> {
        if chunk.data_type() != &self.data_type {
            return Err(Error::TypeMismatch {
                expected: format!("{:?}", self.data_type),
                found: format!("{:?}", chunk.data_type()),
            });
        }
        self.row_count += chunk.len();
        self.chunks.push(chunk);
        self.recompute_watermark(max_batch_size);
        Ok(())
    }

    fn recompute_watermark(&mut self, max_batch_size: usize) {
        self.watermark = self
            .chunks
            .iter()
            .position(|c| c.len() < max_batch_size)
            .unwrap_or(self.chunks.len());
    }

    /// Returns `(chunk_index, offset_within_chunk)` for global row `i`.
    fn locate(&self, i: usize, max_batch_size: usize) -> Result<(usize, usize), Error> {
        if i >= self.row_count {
            return Err(Error::InvalidArgument(format!(
                "row index {i} out of bounds (rowCount = {})",
                self.row_count
            )));
        }

        let candidate = i / max_batch_size;
        if candidate < self.watermark {
            return Ok((candidate, i % max_batch_size));
        }

        // Scan forward from the watermark, bounded by k - watermark (small
        // in practice: at most one short tail chunk plus any not-yet-full
        // in-flight chunk).
        let mut offset = self
            .chunks
            .iter()
            .take(self.watermark)
            .map(|c| c.len())
            .sum::<usize>();
        for (idx, chunk) in self.chunks.iter().enumerate().skip(self.watermark) {
            if i < offset + chunk.len() {
                return Ok((idx, i - offset));
            }
            offset += chunk.len();
        }
        unreachable!("row_count bound already checked i is in range")
    }
}

/// Append-only, per-field list of column chunks with watermark-accelerated
/// random access across unequal tail chunks.
pub struct BatchedColumnStore {
    fields: Vec<String>,
    columns: HashMap<String, FieldColumn>,
    alloc: Node,
    max_batch_size: Option<usize>,
}

impl BatchedColumnStore {
    pub fn new(field_types: Vec<(String, DataType)>, alloc: Node) -> Self {
        let fields: Vec<String> = field_types.iter().map(|(n, _)| n.clone()).collect();
        let columns = field_types
            .into_iter()
            .map(|(name, dt)| (name, FieldColumn::new(dt)))
            .collect();
        BatchedColumnStore {
            fields,
            columns,
            alloc,
            max_batch_size: None,
        }
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    pub fn row_count(&self) -> usize {
        self.columns
            .values()
            .next()
            .map(|c| c.row_count)
            .unwrap_or(0)
    }

    pub fn allocator(&self) -> &Node {
        &self.alloc
    }

    /// Transfers one field's built chunk into the store's own allocator
    /// (moving reservation ownership, not copying the payload) and pushes
    /// it onto that field's chunk list. The first append of a field
    /// defines `maxBatchSize`; later appends may be smaller but not
    /// larger.
    pub fn append_field_chunk(&mut self, field: &str, chunk: ColumnChunk) -> Result<(), Error> {
        let ColumnChunk { array, reservation } = chunk;
        let reservation = reservation.transfer_to(&self.alloc)?;
        let chunk = ColumnChunk { array, reservation };

        let observed_len = chunk.len();
        let max = *self.max_batch_size.get_or_insert(observed_len);
        if observed_len > max {
            return Err(Error::BatchTooLarge {
                got: observed_len,
                max,
            });
        }
        let column = self
            .columns
            .get_mut(field)
            .ok_or_else(|| Error::NotFound(format!("field '{field}'")))?;
        column.push(chunk, max)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size.unwrap_or(usize::MAX)
    }

    pub fn get_by_index(&self, field: &str, i: usize) -> Result<Value, Error> {
        let column = self
            .columns
            .get(field)
            .ok_or_else(|| Error::NotFound(format!("field '{field}'")))?;
        let (chunk_idx, offset) = column.locate(i, self.max_batch_size())?;
        let chunk = &column.chunks[chunk_idx];
        value_at(chunk, offset)
    }

    pub fn get_i64(&self, field: &str, i: usize) -> Result<i64, Error> {
        self.get_by_index(field, i)?.as_i64()
    }

    pub fn get_f64(&self, field: &str, i: usize) -> Result<f64, Error> {
        self.get_by_index(field, i)?.as_f64()
    }

    pub fn get_string(&self, field: &str, i: usize) -> Result<String, Error> {
        match self.get_by_index(field, i)? {
            Value::String(s) => Ok(s),
            other => Err(Error::TypeMismatch {
                expected: "Utf8".to_string(),
                found: format!("{:?}", other.logical_type()),
            }),
        }
    }

    pub fn get_double_list(&self, field: &str, i: usize) -> Result<Vec<f64>, Error> {
        match self.get_by_index(field, i)? {
            Value::DoubleArray(v) => Ok(v),
            Value::List(items) => items.iter().map(Value::as_f64).collect(),
            other => Err(Error::TypeMismatch {
                expected: "DOUBLE_ARRAY or LIST".to_string(),
                found: format!("{:?}", other.logical_type()),
            }),
        }
    }

    /// Closes every chunk then the allocator. Idempotent: a second call
    /// observes an already-empty store and a no-op allocator close.
    pub fn close(&mut self) -> Result<(), Error> {
        for column in self.columns.values_mut() {
            column.chunks.clear();
        }
        self.alloc.close()
    }

    pub fn watermark(&self, field: &str) -> Option<usize> {
        self.columns.get(field).map(|c| c.watermark)
    }

    pub fn chunk_lengths(&self, field: &str) -> Option<Vec<usize>> {
        self.columns
            .get(field)
            .map(|c| c.chunks.iter().map(|ch| ch.len()).collect())
    }
}

fn value_at(chunk: &ColumnChunk, offset: usize) -> Result<Value, Error> {
    use arrow::datatypes::DataType as DT;
    Ok(match chunk.data_type() {
        DT::Int32 => {
            let a = chunk.array.as_primitive::<arrow::datatypes::Int32Type>();
            if a.is_null(offset) {
                Value::Null
            } else {
                Value::Int32(a.value(offset))
            }
        }
        DT::Int64 => {
            let a = chunk.array.as_primitive::<arrow::datatypes::Int64Type>();
            if a.is_null(offset) {
                Value::Null
            } else {
                Value::Int64(a.value(offset))
            }
        }
        DT::Float32 => {
            let a = chunk.array.as_primitive::<arrow::datatypes::Float32Type>();
            if a.is_null(offset) {
                Value::Null
            } else {
                Value::Float32(a.value(offset))
            }
        }
        DT::Float64 => {
            let a = chunk.array.as_primitive::<arrow::datatypes::Float64Type>();
            if a.is_null(offset) {
                Value::Null
            } else {
                Value::Float64(a.value(offset))
            }
        }
        DT::Utf8 => {
            let a = chunk.array.as_string::<i32>();
            if a.is_null(offset) {
                Value::Null
            } else {
                Value::String(a.value(offset).to_string())
            }
        }
        DT::FixedSizeList(field, stride) => {
            let a = chunk.array.as_fixed_size_list();
            if a.is_null(offset) {
                Value::Null
            } else {
                let elem = a.value(offset);
                Value::DoubleArray(primitive_to_f64_vec(field.data_type(), &elem, *stride as usize)?)
            }
        }
        DT::List(_) => {
            let a = chunk.array.as_list::<i32>();
            if a.is_null(offset) {
                Value::Null
            } else {
                let elem = a.value(offset);
                let floats = elem.as_primitive::<arrow::datatypes::Float64Type>();
                Value::List(
                    (0..floats.len())
                        .map(|j| {
                            if floats.is_null(j) {
                                Value::Null
                            } else {
                                Value::Float64(floats.value(j))
                            }
                        })
                        .collect(),
                )
            }
        }
        other => {
            return Err(Error::TypeMismatch {
                expected: "a supported column type".to_string(),
                found: format!("{other:?}"),
            })
        }
    })
}

fn primitive_to_f64_vec(
    dtype: &DataType,
    array: &arrow::array::ArrayRef,
    expected_len: usize,
) -> Result<Vec<f64>, Error> {
    let values: Vec<f64> = match dtype {
        DataType::Float64 => {
            let a = array.as_primitive::<arrow::datatypes::Float64Type>();
            (0..a.len()).map(|i| a.value(i)).collect()
        }
        DataType::Float32 => {
            let a = array.as_primitive::<arrow::datatypes::Float32Type>();
            (0..a.len()).map(|i| a.value(i) as f64).collect()
        }
        DataType::Int32 => {
            let a = array.as_primitive::<arrow::datatypes::Int32Type>();
            (0..a.len()).map(|i| a.value(i) as f64).collect()
        }
        DataType::Int64 => {
            let a = array.as_primitive::<arrow::datatypes::Int64Type>();
            (0..a.len()).map(|i| a.value(i) as f64).collect()
        }
        other => {
            return Err(Error::TypeMismatch {
                expected: "numeric fixed-size-list element".to_string(),
                found: format!("{other:?}"),
            })
        }
    };
    debug_assert_eq!(values.len(), expected_len);
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Node;
    use crate::vectors::ColumnBuilder;

    fn make_chunk(values: &[i64], alloc: &Node) -> ColumnChunk {
        let mut b =
            ColumnBuilder::new_primitive(&DataType::Int64, false, values.len().max(1), alloc)
                .unwrap();
        for (i, v) in values.iter().enumerate() {
            b.set_safe(i, &Value::Int64(*v)).unwrap();
        }
        let dest = alloc.new_child("dest", None);
        b.transfer_to(&dest).unwrap()
    }

    #[test]
    fn random_access_across_short_tail_chunk() {
        let root = Node::root(None);
        let mut store =
            BatchedColumnStore::new(vec![("id".to_string(), DataType::Int64)], root.clone());

        let chunk0 = make_chunk(&(0..10).collect::<Vec<_>>(), &root);
        let chunk1 = make_chunk(&(10..20).collect::<Vec<_>>(), &root);
        let chunk2 = make_chunk(&(20..23).collect::<Vec<_>>(), &root);

        store.append_field_chunk("id", chunk0).unwrap();
        store.append_field_chunk("id", chunk1).unwrap();
        store.append_field_chunk("id", chunk2).unwrap();

        assert_eq!(store.row_count(), 23);
        assert_eq!(store.watermark("id"), Some(2));

        assert_eq!(store.get_i64("id", 0).unwrap(), 0);
        assert_eq!(store.get_i64("id", 19).unwrap(), 19);
        assert_eq!(store.get_i64("id", 22).unwrap(), 22);
        assert!(store.get_by_index("id", 23).is_err());
    }

    #[test]
    fn batch_too_large_after_first_append_fails() {
        let root = Node::root(None);
        let mut store =
            BatchedColumnStore::new(vec![("id".to_string(), DataType::Int64)], root.clone());
        let chunk0 = make_chunk(&(0..5).collect::<Vec<_>>(), &root);
        store.append_field_chunk("id", chunk0).unwrap();

        let chunk1 = make_chunk(&(0..10).collect::<Vec<_>>(), &root);
        let err = store.append_field_chunk("id", chunk1).unwrap_err();
        assert!(matches!(err, Error::BatchTooLarge { .. }));
    }

    #[test]
    fn close_releases_all_chunks_and_is_idempotent() {
        let root = Node::root(None);
        let mut store =
            BatchedColumnStore::new(vec![("id".to_string(), DataType::Int64)], root.clone());
        let chunk0 = make_chunk(&(0..4).collect::<Vec<_>>(), &root);
        store.append_field_chunk("id", chunk0).unwrap();
        store.close().unwrap();
        store.close().unwrap();
    }
}
