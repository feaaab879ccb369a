use tokio::sync::broadcast;
use tracing::debug;

use super::{EventEnvelope, EventPublisher, PublishError};

/// In-process fan-out to any number of async subscribers.
///
/// Slow subscribers observe `RecvError::Lagged` rather than blocking publishers.
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<EventEnvelope>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, envelope: EventEnvelope) -> Result<(), PublishError> {
        match self.sender.send(envelope) {
            Ok(receivers) => {
                debug!(receivers, "event broadcast");
                Ok(())
            }
            // No subscriber yet is not a transport failure.
            Err(broadcast::error::SendError(envelope)) => {
                debug!(event = envelope.kind.label(), "event dropped, no subscribers");
                Ok(())
            }
        }
    }
}
