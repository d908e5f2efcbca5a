//! `gdsRelProperties` action: creates a read job over a named graph
//! projection's relationship properties. Same shape as
//! [`gds_node_properties`](super::gds_node_properties).

use arrow_flight::Action;

use super::cypher_read::RowSourceFactory;
use super::{start_read_job, ActionHandler, JobRegistrar, Outcome};

pub struct GdsRelPropertiesHandler {
    row_source_factory: RowSourceFactory,
}

impl GdsRelPropertiesHandler {
    pub fn new(row_source_factory: RowSourceFactory) -> Self {
        GdsRelPropertiesHandler { row_source_factory }
    }
}

impl ActionHandler for GdsRelPropertiesHandler {
    fn action_types(&self) -> &'static [&'static str] {
        &["gdsRelProperties"]
    }

    fn descriptions(&self) -> Vec<(String, String)> {
        vec![(
            "gdsRelProperties".to_string(),
            "creates a read job over a named graph projection's relationship properties; returns a ticket"
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
