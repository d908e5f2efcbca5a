//! `gds.write.nodes` action: creates a write job backed by a
//! `BatchedColumnStore`.
//!
//! Parsing the GDS write message into a target field schema is the
//! graph-catalog collaborator's job (out of scope); this handler fixes
//! that interface as an injected schema factory and otherwise just wires
//! the resulting store onto a fresh ticket.

use std::sync::Arc;

use arrow::datatypes::DataType;
use arrow_flight::Action;

use super::{ActionHandler, JobRegistrar, Outcome};
use crate::column_store::BatchedColumnStore;
use crate::errors::Error;
use crate::job::{Job, WriteJob};

pub type SchemaFactory =
    Arc<dyn Fn(&[u8]) -> Result<Vec<(String, DataType)>, Error> + Send + Sync>;

pub struct GdsWriteNodesHandler {
    schema_factory: SchemaFactory,
}

impl GdsWriteNodesHandler {
    pub fn new(schema_factory: SchemaFactory) -> Self {
        GdsWriteNodesHandler { schema_factory }
    }
}

impl ActionHandler for GdsWriteNodesHandler {
    fn action_types(&self) -> &'static [&'static str] {
        &["gds.write.nodes"]
    }

    fn descriptions(&self) -> Vec<(String, String)> {
        vec![(
            "gds.write.nodes".to_string(),
            "creates a write job from a serialized GDS write message; returns a ticket".to_string(),
        )]
    }

    fn handle(&self, action: &Action, registrar: &dyn JobRegistrar) -> Outcome {
        match (self.schema_factory)(&action.body) {
            Ok(fields) => {
                let alloc = registrar.new_store_allocator("gds.write.nodes");
                let store = BatchedColumnStore::new(fields, alloc);
                let job = Job::Write(WriteJob::new(store));
                let ticket = registrar.ticket_job(job, None, None);
                Outcome::Success(ticket.to_bytes())
            }
            Err(e) => Outcome::Failure(e),
        }
    }
}
