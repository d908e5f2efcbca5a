//! Job state machine and the read/write job contracts.
//!
//! Small, focused types with one concrete responsibility each, composed
//! by the caller rather than collapsed into one god-trait: `ReadJob` and
//! `WriteJob` cover the two wire-visible job modes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::column_store::BatchedColumnStore;
use crate::errors::Error;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Initializing,
    Pending,
    Producing,
    Complete,
    Error,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Error | JobState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Read,
    Write,
}

/// One row handed to a row consumer, tagged with its destination
/// partition key.
pub struct PartitionedRow {
    pub row: Vec<(String, Value)>,
    pub partition_key: u64,
}

/// Shared state machine backing both job modes. Terminal states are
/// sticky: once set, further transition attempts are no-ops.
pub struct JobStatus {
    state: Mutex<JobState>,
    cancelled: AtomicBool,
}

impl JobStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(JobStatus {
            state: Mutex::new(JobState::Initializing),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn get(&self) -> JobState {
        *self.state.lock().unwrap()
    }

    /// Transitions to `next` unless the job is already in a terminal
    /// state, in which case this is a no-op (terminal states are
    /// sticky).
    pub fn transition(&self, next: JobState) {
        let mut guard = self.state.lock().unwrap();
        if !guard.is_terminal() {
            *guard = next;
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.transition(JobState::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A read job: a row-producing collaborator (the graph driver, out of
/// scope for this crate) drives `consume` with every row it produces,
/// tagged with a partition key, until it finishes or fails.
pub struct ReadJob {
    pub status: Arc<JobStatus>,
    /// Resolves once the first row has arrived, used for schema
    /// inference.
    pub first_record: Mutex<Option<oneshot::Receiver<Vec<(String, Value)>>>>,
    first_record_tx: Mutex<Option<oneshot::Sender<Vec<(String, Value)>>>>,
}

impl ReadJob {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        ReadJob {
            status: JobStatus::new(),
            first_record: Mutex::new(Some(rx)),
            first_record_tx: Mutex::new(Some(tx)),
        }
    }

    /// Called by the row-producing collaborator for the very first row,
    /// so schema inference can proceed before the rest of the stream is
    /// dispatched to the partitioned pool.
    pub fn publish_first_record(&self, row: Vec<(String, Value)>) {
        if let Some(tx) = self.first_record_tx.lock().unwrap().take() {
            let _ = tx.send(row);
        }
    }
}

impl Default for ReadJob {
    fn default() -> Self {
        Self::new()
    }
}

/// A write job: incoming record batches accumulate into a
/// `BatchedColumnStore`; `into_store_and_finish` hands the
/// fully-assembled store to the external graph-catalog collaborator —
/// no concrete catalog writer ships in this crate.
pub struct WriteJob {
    pub status: Arc<JobStatus>,
    pub store: Mutex<Option<BatchedColumnStore>>,
}

impl WriteJob {
    pub fn new(store: BatchedColumnStore) -> Self {
        WriteJob {
            status: JobStatus::new(),
            store: Mutex::new(Some(store)),
        }
    }

    /// Hands the fully-assembled store to `sink`, consuming it. Returns
    /// `Internal` if called twice (the store is taken on first use).
    pub fn into_store_and_finish(
        &self,
        sink: &dyn GraphCatalogSink,
    ) -> Result<(), Error> {
        let store = self
            .store
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Internal("write job store already consumed".to_string()))?;
        sink.write(store)
    }
}

/// External collaborator that turns a fully-assembled column store into
/// graph-catalog structures. Out of scope for this crate; the producer
/// only needs to know it can hand the store off.
pub trait GraphCatalogSink: Send + Sync {
    fn write(&self, store: BatchedColumnStore) -> Result<(), Error>;
}

pub enum Job {
    Read(ReadJob),
    Write(WriteJob),
}

impl Job {
    pub fn status(&self) -> Arc<JobStatus> {
        match self {
            Job::Read(j) => j.status.clone(),
            Job::Write(j) => j.status.clone(),
        }
    }

    pub fn mode(&self) -> JobMode {
        match self {
            Job::Read(_) => JobMode::Read,
            Job::Write(_) => JobMode::Write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_state_is_sticky() {
        let status = JobStatus::new();
        status.transition(JobState::Pending);
        status.transition(JobState::Error);
        status.transition(JobState::Producing);
        assert_eq!(status.get(), JobState::Error);
    }

    #[test]
    fn cancel_is_idempotent() {
        let status = JobStatus::new();
        status.cancel();
        status.cancel();
        assert_eq!(status.get(), JobState::Cancelled);
        assert!(status.is_cancelled());
    }

    #[tokio::test]
    async fn first_record_resolves_once() {
        let job = ReadJob::new();
        let rx = job.first_record.lock().unwrap().take().unwrap();
        job.publish_first_record(vec![("id".to_string(), Value::Int64(1))]);
        let row = rx.await.unwrap();
        assert_eq!(row[0].0, "id");
    }
}
