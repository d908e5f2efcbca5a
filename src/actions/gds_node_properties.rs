//! `gdsNodeProperties` action: creates a read job over a named graph
//! projection's node properties.
//!
//! Same collaborator shape as [`cypher_read`](super::cypher_read): parsing
//! the GDS message and walking the named projection are the graph
//! catalog's job, out of scope here.

use arrow_flight::Action;

use super::cypher_read::RowSourceFactory;
use super::{start_read_job, ActionHandler, JobRegistrar, Outcome};

pub struct GdsNodePropertiesHandler {
    row_source_factory: RowSourceFactory,
}

impl GdsNodePropertiesHandler {
    pub fn new(row_source_factory: RowSourceFactory) -> Self {
        GdsNodePropertiesHandler { row_source_factory }
    }
}

impl ActionHandler for GdsNodePropertiesHandler {
    fn action_types(&self) -> &'static [&'static str] {
        &["gdsNodeProperties"]
    }

    fn descriptions(&self) -> Vec<(String, String)> {
        vec![(
            "gdsNodeProperties".to_string(),
            "creates a read job over a named graph projection's node properties; returns a ticket"
                .to_string(),
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
