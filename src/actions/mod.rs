//! Pluggable action handlers and the row-source contract handed to read
//! jobs.
//!
//! Small, single-purpose traits composed by the caller instead of one
//! god-trait: `ActionHandler` is the pluggable capability, `RowSource`
//! is an iterator-like pull contract the job drives.

pub mod cypher_read;
pub mod gds_node_properties;
pub mod gds_rel_properties;
pub mod gds_write_nodes;
pub mod status;

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow_flight::Action;

use crate::errors::Error;
use crate::job::Job;
use crate::ticket::Ticket;
use crate::value::Value;

/// Pull-based row source driving a read job, one row at a time, each
/// tagged with its destination partition key — the partitioned pool
/// (not the source) owns batching.
pub trait RowSource: Send {
    /// Pulls the next row, or `None` at end of stream.
    fn next_row(&mut self) -> Result<Option<(Vec<(String, Value)>, u64)>, Error>;
}

/// Replays one already-pulled row before delegating to `inner`. Read
/// action handlers pull the first row synchronously to infer the schema
/// and publish it onto the ticket before the client ever sees it, then
/// hand the row back to the stream via this wrapper so it isn't lost.
pub struct BufferedRowSource {
    first: Option<(Vec<(String, Value)>, u64)>,
    inner: Box<dyn RowSource>,
}

impl BufferedRowSource {
    pub fn new(first: (Vec<(String, Value)>, u64), inner: Box<dyn RowSource>) -> Self {
        BufferedRowSource {
            first: Some(first),
            inner,
        }
    }
}

impl RowSource for BufferedRowSource {
    fn next_row(&mut self) -> Result<Option<(Vec<(String, Value)>, u64)>, Error> {
        if let Some(row) = self.first.take() {
            return Ok(Some(row));
        }
        self.inner.next_row()
    }
}

/// The outcome of a `doAction` dispatch.
pub enum Outcome {
    Success(Vec<u8>),
    Failure(Error),
}

/// Capability the producer exposes to action handlers, narrow enough
/// that handlers don't need the full `FlightService` surface — jobs
/// hold no back-pointer to the producer beyond this.
pub trait JobRegistrar: Send + Sync {
    /// Mints a fresh ticket and stores the job. For read jobs, `schema`
    /// must be `Some` and is published as the flight's `FlightInfo`
    /// before this call returns, and the job transitions to
    /// `PRODUCING` atomically with that publication — by the time the
    /// caller hands the ticket bytes back to the client, `getFlightInfo`
    /// already resolves.
    fn ticket_job(
        &self,
        job: Job,
        schema: Option<SchemaRef>,
        row_source: Option<Box<dyn RowSource>>,
    ) -> Ticket;

    /// A fresh child of the producer's root allocator, scoped to one
    /// write job's `BatchedColumnStore` — every chunk is attributed to
    /// an explicit allocator child.
    fn new_store_allocator(&self, name: &str) -> crate::mem::Node;
}

/// A pluggable action handler: declares the action-type strings it
/// serves, human-readable descriptions for `listActions`, and handles
/// one `(action, registrar)` pair.
pub trait ActionHandler: Send + Sync {
    fn action_types(&self) -> &'static [&'static str];

    fn descriptions(&self) -> Vec<(String, String)> {
        self.action_types()
            .iter()
            .map(|t| (t.to_string(), format!("handles action type '{t}'")))
            .collect()
    }

    fn handle(&self, action: &Action, registrar: &dyn JobRegistrar) -> Outcome;
}

/// Shared by every read-job action handler: pulls the first row
/// synchronously to infer the schema, publishes it, and tickets the
/// job with the first row replayed via [`BufferedRowSource`]. An empty
/// result set (no rows at all) publishes an empty schema; the stream
/// then completes with zero batches.
pub fn start_read_job(
    mut row_source: Box<dyn RowSource>,
    registrar: &dyn JobRegistrar,
) -> Result<Ticket, Error> {
    let schema = match row_source.next_row()? {
        Some((row, key)) => {
            let schema = crate::flight_info::infer_schema(&row)?;
            let buffered = BufferedRowSource::new((row, key), row_source);
            let job = Job::Read(crate::job::ReadJob::new());
            return Ok(registrar.ticket_job(job, Some(schema), Some(Box::new(buffered))));
        }
        None => Arc::new(arrow::datatypes::Schema::empty()),
    };
    let job = Job::Read(crate::job::ReadJob::new());
    Ok(registrar.ticket_job(job, Some(schema), Some(row_source)))
}

/// Map-based registry: backends register by name rather than through a
/// macro-generated dispatch table.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        ActionRegistry::default()
    }

    /// Associates every action type the handler declares with it.
    pub fn register_handler(&mut self, handler: Arc<dyn ActionHandler>) {
        for action_type in handler.action_types() {
            self.handlers.insert(action_type.to_string(), handler.clone());
        }
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).cloned()
    }

    /// Enumerates distinct handler descriptions for `listActions`.
    pub fn list_descriptions(&self) -> Vec<(String, String)> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for handler in self.handlers.values() {
            for (ty, desc) in handler.descriptions() {
                if seen.insert(ty.clone()) {
                    out.push((ty, desc));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl ActionHandler for Echo {
        fn action_types(&self) -> &'static [&'static str] {
            &["echo"]
        }

        fn handle(&self, _action: &Action, _registrar: &dyn JobRegistrar) -> Outcome {
            Outcome::Success(b"ok".to_vec())
        }
    }

    #[test]
    fn registering_associates_every_declared_type() {
        let mut registry = ActionRegistry::new();
        registry.register_handler(Arc::new(Echo));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn list_descriptions_deduplicates_by_type() {
        let mut registry = ActionRegistry::new();
        registry.register_handler(Arc::new(Echo));
        assert_eq!(registry.list_descriptions().len(), 1);
    }
}
