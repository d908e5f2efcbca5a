//! Single-consumer pipeline turning built batches into wire record
//! batches.
//!
//! The LZ4-frame-compressed `FlightDataEncoderBuilder` that drives the
//! wire encoding lives in the producer, applied over the stream of
//! `RecordBatch`es this pipeline emits; this module's own job stops at
//! building a validated `RecordBatch` per `FlushWork`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::errors::Error;
use crate::pool::FlushWork;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runs on a dedicated `std::thread`, draining `FlushWork` items and
/// emitting `RecordBatch`es in strict enqueue order — the ordering
/// guarantee falls out of the pipeline itself being single-threaded.
pub struct FlushPipeline {
    schema: SchemaRef,
    work_rx: Receiver<FlushWork>,
    out_tx: tokio::sync::mpsc::Sender<Result<RecordBatch, Error>>,
    is_feeding: Arc<AtomicBool>,
    errored: Arc<AtomicBool>,
}

impl FlushPipeline {
    pub fn new(
        schema: SchemaRef,
        work_rx: Receiver<FlushWork>,
        out_tx: tokio::sync::mpsc::Sender<Result<RecordBatch, Error>>,
        is_feeding: Arc<AtomicBool>,
        errored: Arc<AtomicBool>,
    ) -> Self {
        FlushPipeline {
            schema,
            work_rx,
            out_tx,
            is_feeding,
            errored,
        }
    }

    /// Drains the queue until `is_feeding` goes false and the queue is
    /// empty, or the downstream response stream is gone. Intended to be
    /// run via `std::thread::spawn`.
    pub fn run(self) {
        loop {
            match self.work_rx.recv_timeout(POLL_INTERVAL) {
                Ok(work) => match self.handle(work) {
                    Ok(batch) => {
                        if self.out_tx.blocking_send(Ok(batch)).is_err() {
                            // Client dropped the response stream. Nothing
                            // left to feed or to report errors to.
                            self.is_feeding.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    Err(err) => {
                        self.errored.store(true, Ordering::SeqCst);
                        let _ = self.out_tx.blocking_send(Err(err));
                        break;
                    }
                },
                Err(RecvTimeoutError::Timeout) => {
                    if !self.is_feeding.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle(&self, work: FlushWork) -> Result<RecordBatch, Error> {
        let n = work.effective_row_count;
        let mut columns = Vec::with_capacity(self.schema.fields().len());
        for field in self.schema.fields() {
            let (_, chunk) = work
                .vectors
                .iter()
                .find(|(name, _)| name == field.name())
                .ok_or_else(|| {
                    Error::Internal(format!("flush snapshot missing field '{}'", field.name()))
                })?;
            if chunk.len() != n {
                return Err(Error::Internal(format!(
                    "field '{}' has {} values, expected {n}",
                    field.name(),
                    chunk.len()
                )));
            }
            columns.push(chunk.array.clone());
        }

        RecordBatch::try_new(self.schema.clone(), columns).map_err(Error::Arrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Node;
    use crate::vectors::ColumnBuilder;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::mpsc::sync_channel;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]))
    }

    fn work(values: &[i64]) -> FlushWork {
        let root = Node::root(None);
        let mut b =
            ColumnBuilder::new_primitive(&DataType::Int64, false, values.len(), &root).unwrap();
        for (i, v) in values.iter().enumerate() {
            b.set_safe(i, &crate::value::Value::Int64(*v)).unwrap();
        }
        let dest = root.new_child("transmit", None);
        let chunk = b.transfer_to(&dest).unwrap();
        FlushWork {
            vectors: vec![("id".to_string(), chunk)],
            effective_row_count: values.len(),
        }
    }

    #[tokio::test]
    async fn emits_batches_in_enqueue_order() {
        let (work_tx, work_rx) = sync_channel(8);
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(8);
        let is_feeding = Arc::new(AtomicBool::new(true));
        let errored = Arc::new(AtomicBool::new(false));

        let pipeline = FlushPipeline::new(
            schema(),
            work_rx,
            out_tx,
            is_feeding.clone(),
            errored.clone(),
        );
        let handle = std::thread::spawn(move || pipeline.run());

        work_tx.send(work(&[1, 2])).unwrap();
        work_tx.send(work(&[3, 4])).unwrap();
        is_feeding.store(false, Ordering::SeqCst);
        drop(work_tx);

        let first = out_rx.recv().await.unwrap().unwrap();
        let second = out_rx.recv().await.unwrap().unwrap();
        assert_eq!(first.num_rows(), 2);
        assert_eq!(second.num_rows(), 2);
        assert!(out_rx.recv().await.is_none());
        handle.join().unwrap();
        assert!(!errored.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stops_feeding_without_latching_error_when_downstream_is_gone() {
        let (work_tx, work_rx) = sync_channel(8);
        let (out_tx, out_rx) = tokio::sync::mpsc::channel(8);
        let is_feeding = Arc::new(AtomicBool::new(true));
        let errored = Arc::new(AtomicBool::new(false));

        let pipeline = FlushPipeline::new(
            schema(),
            work_rx,
            out_tx,
            is_feeding.clone(),
            errored.clone(),
        );
        let handle = std::thread::spawn(move || pipeline.run());

        // Dropping the receiver simulates the client disconnecting.
        drop(out_rx);
        work_tx.send(work(&[1, 2])).unwrap();

        handle.join().unwrap();
        assert!(!is_feeding.load(Ordering::SeqCst));
        assert!(!errored.load(Ordering::SeqCst));
    }
}
