//! Opaque ticket identifiers and the FlightInfo published for each.
//!
//! A small `Copy`/`Eq` wrapper struct around a random 16-byte
//! identifier, rather than a type tag.

use arrow::datatypes::SchemaRef;
use arrow_flight::{FlightDescriptor, FlightEndpoint, FlightInfo as WireFlightInfo};
use uuid::Uuid;

/// Opaque 16-byte ticket, unique per process. Round-trips through the
/// wire as the raw bytes of a UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(pub [u8; 16]);

impl Ticket {
    pub fn new() -> Self {
        Ticket(*Uuid::new_v4().as_bytes())
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Ticket(arr))
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-side record of a published flight: schema, descriptor and
/// endpoint, with unknown record/byte counts reported as `-1`, matching
/// Arrow Flight's own convention for unknown sizes.
#[derive(Debug, Clone)]
pub struct FlightInfo {
    pub schema: SchemaRef,
    pub ticket: Ticket,
}

impl FlightInfo {
    pub fn new(schema: SchemaRef, ticket: Ticket) -> Self {
        FlightInfo { schema, ticket }
    }

    /// Builds the wire-format `arrow_flight::FlightInfo` for this entry.
    pub fn to_wire(&self) -> Result<WireFlightInfo, crate::errors::Error> {
        let descriptor = FlightDescriptor::new_cmd(self.ticket.to_bytes());
        let endpoint = FlightEndpoint::new().with_ticket(arrow_flight::Ticket {
            ticket: self.ticket.to_bytes().into(),
        });
        WireFlightInfo::new()
            .try_with_schema(&self.schema)
            .map_err(crate::errors::Error::Arrow)
            .map(|info| {
                info.with_descriptor(descriptor)
                    .with_endpoint(endpoint)
                    .with_total_records(-1)
                    .with_total_bytes(-1)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_round_trips_through_bytes() {
        let t = Ticket::new();
        let bytes = t.to_bytes();
        assert_eq!(Ticket::from_bytes(&bytes), Some(t));
    }

    #[test]
    fn malformed_bytes_fail_to_parse() {
        assert_eq!(Ticket::from_bytes(&[1, 2, 3]), None);
    }
}
