//! Fixed-arity set of per-partition column builders with mutual
//! exclusion, feeding the flush pipeline.
//!
//! A fixed arity `P` is shared across however many worker tasks are
//! feeding rows, each row routed to partition `key mod P` and writing
//! under that partition's own mutex rather than owning a dedicated
//! writer outright.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::datatypes::{DataType, SchemaRef};

use crate::errors::Error;
use crate::mem::Node;
use crate::value::{RowRecord, Value};
use crate::vectors::{ColumnBuilder, ColumnChunk};

/// A snapshot of one partition's built columns, enqueued for the flush
/// pipeline. Ownership of the chunks' reservations passes from the
/// producer to the pipeline on enqueue.
pub struct FlushWork {
    pub vectors: Vec<(String, ColumnChunk)>,
    pub effective_row_count: usize,
}

const MAX_ALLOC_RETRIES: usize = 1000;
const ALLOC_RETRY_SLEEP: Duration = Duration::from_micros(200);

struct Partition {
    alloc: Node,
    builders: Option<Vec<ColumnBuilder>>,
    idx: usize,
}

pub struct PartitionedBuilderPool {
    schema: SchemaRef,
    batch_size: usize,
    transmit_alloc: Node,
    partitions: Vec<Mutex<Partition>>,
    transfer_mutex: Mutex<()>,
    work_tx: SyncSender<FlushWork>,
    errored: AtomicBool,
    on_error: Mutex<Option<Arc<dyn Fn(&Error) + Send + Sync>>>,
}

impl PartitionedBuilderPool {
    pub fn new(
        schema: SchemaRef,
        batch_size: usize,
        arity: usize,
        base_alloc: &Node,
        transmit_alloc: Node,
        work_tx: SyncSender<FlushWork>,
    ) -> Self {
        let partitions = (0..arity)
            .map(|p| {
                Mutex::new(Partition {
                    alloc: base_alloc.new_child(format!("partition-{p}"), None),
                    builders: None,
                    idx: 0,
                })
            })
            .collect();

        PartitionedBuilderPool {
            schema,
            batch_size,
            transmit_alloc,
            partitions,
            transfer_mutex: Mutex::new(()),
            work_tx,
            errored: AtomicBool::new(false),
            on_error: Mutex::new(None),
        }
    }

    pub fn set_on_error(&self, cb: Arc<dyn Fn(&Error) + Send + Sync>) {
        *self.on_error.lock().unwrap() = Some(cb);
    }

    pub fn has_errored(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }

    /// Routes one row to partition `key mod P`, writes its values, and
    /// flushes the partition once it fills `batch_size` rows. Returns
    /// immediately without touching any builder once the one-shot error
    /// latch has tripped (subsequent rows are dropped).
    pub fn consume(&self, row: &dyn RowRecord, key: u64) -> Result<(), Error> {
        if self.has_errored() {
            return Ok(());
        }

        let p = (key % self.partitions.len() as u64) as usize;
        let mut guard = self.partitions[p]
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        let result = self.consume_locked(&mut guard, row);
        if let Err(ref e) = result {
            self.latch_error(e);
        }
        result
        // `guard` drops here, always releasing the partition mutex.
    }

    fn latch_error(&self, err: &Error) {
        if !self.errored.swap(true, Ordering::SeqCst) {
            if let Some(cb) = self.on_error.lock().unwrap().as_ref() {
                cb(err);
            }
        }
    }

    fn consume_locked(&self, partition: &mut Partition, row: &dyn RowRecord) -> Result<(), Error> {
        if partition.idx == 0 && partition.builders.is_none() {
            partition.builders = Some(self.allocate_builders(&partition.alloc)?);
        }

        let builders = partition.builders.as_mut().expect("just ensured above");
        for (i, field) in self.schema.fields().iter().enumerate() {
            let value = row.get_named(field.name()).cloned().unwrap_or(Value::Null);
            builders[i].set_safe(partition.idx, &value)?;
        }
        partition.idx += 1;

        if partition.idx == self.batch_size {
            self.flush_partition(partition)?;
        }
        Ok(())
    }

    fn allocate_builders(&self, alloc: &Node) -> Result<Vec<ColumnBuilder>, Error> {
        let mut attempt = 0;
        loop {
            match self.try_allocate_builders(alloc) {
                Ok(builders) => return Ok(builders),
                Err(e) if attempt < MAX_ALLOC_RETRIES => {
                    attempt += 1;
                    std::thread::sleep(ALLOC_RETRY_SLEEP);
                    let _ = e;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_allocate_builders(&self, alloc: &Node) -> Result<Vec<ColumnBuilder>, Error> {
        self.schema
            .fields()
            .iter()
            .map(|f| match f.data_type() {
                DataType::FixedSizeList(elem, stride) => ColumnBuilder::new_fixed_size_list(
                    elem.data_type(),
                    *stride as usize,
                    f.is_nullable(),
                    self.batch_size,
                    alloc,
                ),
                DataType::List(_) => {
                    ColumnBuilder::new_var_list_f64(f.is_nullable(), self.batch_size, alloc)
                }
                other => {
                    ColumnBuilder::new_primitive(other, f.is_nullable(), self.batch_size, alloc)
                }
            })
            .collect()
    }

    /// Flushes whatever rows a partition has staged, even if short of a
    /// full batch (used both by the normal batch-boundary path and by the
    /// straggler flush at end of stream).
    pub fn flush_partition_at(&self, partition_index: usize) -> Result<(), Error> {
        let mut guard = self.partitions[partition_index]
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if guard.idx > 0 {
            self.flush_partition(&mut guard)?;
        }
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn flush_partition(&self, partition: &mut Partition) -> Result<(), Error> {
        let _transfer_guard = self
            .transfer_mutex
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        let builders = partition.builders.take().expect("flush requires builders");
        let n = partition.idx;
        let mut vectors = Vec::with_capacity(builders.len());
        for (field, mut builder) in self.schema.fields().iter().zip(builders) {
            builder.set_value_count(n)?;
            let chunk = builder.transfer_to(&self.transmit_alloc)?;
            vectors.push((field.name().clone(), chunk));
        }

        self.work_tx
            .send(FlushWork {
                vectors,
                effective_row_count: n,
            })
            .map_err(|_| Error::Internal("flush pipeline receiver dropped".to_string()))?;

        partition.idx = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::OwnedRow;
    use arrow::datatypes::{Field, Schema};
    use std::sync::mpsc::sync_channel;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]))
    }

    fn row(id: i64, name: &str) -> OwnedRow {
        OwnedRow::new(
            Arc::new(vec!["id".to_string(), "name".to_string()]),
            vec![Value::Int64(id), Value::String(name.to_string())],
        )
    }

    #[test]
    fn exact_batch_boundary_flushes_in_enqueue_order() {
        let root = Node::root(None);
        let (tx, rx) = sync_channel(16);
        let pool = PartitionedBuilderPool::new(
            schema(),
            2,
            1,
            &root.new_child("base", None),
            root.new_child("transmit", None),
            tx,
        );

        for (id, name) in [(1i64, "a"), (2, "b"), (3, "c"), (4, "d")] {
            pool.consume(&row(id, name), 0).unwrap();
        }

        let batches: Vec<_> = rx.try_iter().collect();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.effective_row_count == 2));
    }

    #[test]
    fn partitioned_interleave_never_exceeds_batch_size() {
        let root = Node::root(None);
        let (tx, rx) = sync_channel(16);
        let pool = PartitionedBuilderPool::new(
            schema(),
            2,
            2,
            &root.new_child("base", None),
            root.new_child("transmit", None),
            tx,
        );

        let keys = [0u64, 1, 0, 1, 0];
        for (i, key) in keys.iter().enumerate() {
            pool.consume(&row(i as i64, "x"), *key).unwrap();
        }
        for p in 0..pool.partition_count() {
            pool.flush_partition_at(p).unwrap();
        }

        let batches: Vec<_> = rx.try_iter().collect();
        let total: usize = batches.iter().map(|b| b.effective_row_count).sum();
        assert_eq!(total, 5);
        assert!(batches.iter().all(|b| b.effective_row_count <= 2));
    }

    #[test]
    fn fixed_size_list_length_mismatch_latches_error() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "vec",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float64, true)), 3),
            false,
        )]));
        let root = Node::root(None);
        let (tx, _rx) = sync_channel(16);
        let pool = PartitionedBuilderPool::new(
            schema,
            4,
            1,
            &root.new_child("base", None),
            root.new_child("transmit", None),
            tx,
        );

        let bad_row = OwnedRow::new(
            Arc::new(vec!["vec".to_string()]),
            vec![Value::DoubleArray(vec![1.0, 2.0])],
        );

        let err = pool.consume(&bad_row, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(pool.has_errored());
    }
}
