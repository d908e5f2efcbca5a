//! `status` action: an empty-bodied health probe.

use arrow_flight::Action;

use super::{ActionHandler, JobRegistrar, Outcome};

pub struct StatusHandler;

impl ActionHandler for StatusHandler {
    fn action_types(&self) -> &'static [&'static str] {
        &["status"]
    }

    fn descriptions(&self) -> Vec<(String, String)> {
        vec![(
            "status".to_string(),
            "returns a server-status blob".to_string(),
        )]
    }

    fn handle(&self, _action: &Action, _registrar: &dyn JobRegistrar) -> Outcome {
        Outcome::Success(b"OK".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_the_status_action_type() {
        assert_eq!(StatusHandler.action_types(), &["status"]);
    }
}
