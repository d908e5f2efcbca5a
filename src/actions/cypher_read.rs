//! `cypherRead` action: creates a read job over a serialized Cypher
//! message.
//!
//! Parsing the Cypher message and driving rows off the wire are the
//! graph driver's job, out of scope for this crate; this handler only
//! fixes the collaborator's interface — a factory turning the raw action
//! body into a [`RowSource`] — and wires the resulting read job onto a
//! fresh ticket.

use std::sync::Arc;

use arrow_flight::Action;

use super::{start_read_job, ActionHandler, JobRegistrar, Outcome, RowSource};
use crate::errors::Error;

pub type RowSourceFactory = Arc<dyn Fn(&[u8]) -> Result<Box<dyn RowSource>, Error> + Send + Sync>;

pub struct CypherReadHandler {
    row_source_factory: RowSourceFactory,
}

impl CypherReadHandler {
    pub fn new(row_source_factory: RowSourceFactory) -> Self {
        CypherReadHandler { row_source_factory }
    }
}

impl ActionHandler for CypherReadHandler {
    fn action_types(&self) -> &'static [&'static str] {
        &["cypherRead"]
    }

    fn descriptions(&self) -> Vec<(String, String)> {
        vec![(
            "cypherRead".to_string(),
            "creates a read job from a serialized Cypher message; returns a ticket".to_string(),
        )]
    }

    fn handle(&self, action: &Action, registrar: &dyn JobRegistrar) -> Outcome {
        let outcome = (self.row_source_factory)(&action.body)
            .and_then(|row_source| start_read_job(row_source, registrar));
        match outcome {
            Ok(ticket) => Outcome::Success(ticket.to_bytes()),
            Err(e) => Outcome::Failure(e),
        }
    }
}
