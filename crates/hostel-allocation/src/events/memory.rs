use std::sync::{Arc, Mutex};

use super::{EventEnvelope, EventKind, EventPublisher, PublishError};

/// Publisher that keeps every envelope in memory. Backs the demo and the tests.
#[derive(Default, Clone)]
pub struct InMemoryEventLog {
    envelopes: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl InMemoryEventLog {
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.envelopes.lock().expect("event log mutex poisoned").clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.envelopes
            .lock()
            .expect("event log mutex poisoned")
            .iter()
            .map(|envelope| envelope.kind)
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.envelopes
            .lock()
            .expect("event log mutex poisoned")
            .iter()
            .filter(|envelope| envelope.kind == kind)
            .count()
    }
}

impl EventPublisher for InMemoryEventLog {
    fn publish(&self, envelope: EventEnvelope) -> Result<(), PublishError> {
        self.envelopes
            .lock()
            .expect("event log mutex poisoned")
            .push(envelope);
        Ok(())
    }
}
