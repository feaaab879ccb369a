//! Domain events and the outbound notifier seam.
//!
//! Every successful state change produces one or more [`DomainEvent`]s. They are
//! wrapped in an [`EventEnvelope`] and handed to an [`EventPublisher`] only after
//! the state has been committed, so a publish failure never rolls anything back.
//! Delivery is at-least-once; consumers wrap their handler in an
//! [`IdempotentConsumer`] to drop redeliveries.

mod broadcast;
mod memory;
mod projection;

pub use broadcast::BroadcastPublisher;
pub use memory::InMemoryEventLog;
pub use projection::OccupancyProjection;

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::allocation::requests::RequestId;
use crate::allocation::rules::{RuleId, StudentId};
use crate::bookings::BookingId;
use crate::inventory::{BedId, HostelId, OccupantRef, RoomId};

/// Name stamped on every envelope produced by this engine.
pub const EVENT_SOURCE: &str = "hostel-allocation";

/// Closed set of state changes announced to other services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    BedHeld {
        bed_id: BedId,
        occupant: OccupantRef,
        hold_expires_at: DateTime<Utc>,
    },
    BedAllocated {
        bed_id: BedId,
        occupant: OccupantRef,
    },
    BedReleased {
        bed_id: BedId,
        previous_occupant: Option<OccupantRef>,
    },
    BedHoldExpired {
        bed_id: BedId,
        occupant: OccupantRef,
    },
    AllocationRequestCreated {
        request_id: RequestId,
        student_id: StudentId,
        rule_id: RuleId,
    },
    AllocationRequestApproved {
        request_id: RequestId,
        actor: String,
    },
    AllocationRequestRejected {
        request_id: RequestId,
        reason: String,
    },
    AllocationRequestWaitlisted {
        request_id: RequestId,
        rule_id: RuleId,
        position: u32,
    },
    AllocationRequestAllocated {
        request_id: RequestId,
        hostel_id: HostelId,
        room_id: RoomId,
        bed_id: BedId,
    },
    AllocationRequestCancelled {
        request_id: RequestId,
        reason: String,
    },
    BookingCreated {
        booking_id: BookingId,
        bed_id: BedId,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    BookingConfirmed {
        booking_id: BookingId,
        bed_id: BedId,
    },
    BookingCancelled {
        booking_id: BookingId,
        bed_id: BedId,
    },
}

/// Discriminant of [`DomainEvent`], used for routing and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    BedHeld,
    BedAllocated,
    BedReleased,
    BedHoldExpired,
    AllocationRequestCreated,
    AllocationRequestApproved,
    AllocationRequestRejected,
    AllocationRequestWaitlisted,
    AllocationRequestAllocated,
    AllocationRequestCancelled,
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
}

impl EventKind {
    pub const fn label(self) -> &'static str {
        match self {
            EventKind::BedHeld => "BedHeld",
            EventKind::BedAllocated => "BedAllocated",
            EventKind::BedReleased => "BedReleased",
            EventKind::BedHoldExpired => "BedHoldExpired",
            EventKind::AllocationRequestCreated => "AllocationRequestCreated",
            EventKind::AllocationRequestApproved => "AllocationRequestApproved",
            EventKind::AllocationRequestRejected => "AllocationRequestRejected",
            EventKind::AllocationRequestWaitlisted => "AllocationRequestWaitlisted",
            EventKind::AllocationRequestAllocated => "AllocationRequestAllocated",
            EventKind::AllocationRequestCancelled => "AllocationRequestCancelled",
            EventKind::BookingCreated => "BookingCreated",
            EventKind::BookingConfirmed => "BookingConfirmed",
            EventKind::BookingCancelled => "BookingCancelled",
        }
    }
}

impl DomainEvent {
    pub const fn kind(&self) -> EventKind {
        match self {
            DomainEvent::BedHeld { .. } => EventKind::BedHeld,
            DomainEvent::BedAllocated { .. } => EventKind::BedAllocated,
            DomainEvent::BedReleased { .. } => EventKind::BedReleased,
            DomainEvent::BedHoldExpired { .. } => EventKind::BedHoldExpired,
            DomainEvent::AllocationRequestCreated { .. } => EventKind::AllocationRequestCreated,
            DomainEvent::AllocationRequestApproved { .. } => EventKind::AllocationRequestApproved,
            DomainEvent::AllocationRequestRejected { .. } => EventKind::AllocationRequestRejected,
            DomainEvent::AllocationRequestWaitlisted { .. } => {
                EventKind::AllocationRequestWaitlisted
            }
            DomainEvent::AllocationRequestAllocated { .. } => {
                EventKind::AllocationRequestAllocated
            }
            DomainEvent::AllocationRequestCancelled { .. } => {
                EventKind::AllocationRequestCancelled
            }
            DomainEvent::BookingCreated { .. } => EventKind::BookingCreated,
            DomainEvent::BookingConfirmed { .. } => EventKind::BookingConfirmed,
            DomainEvent::BookingCancelled { .. } => EventKind::BookingCancelled,
        }
    }
}

/// Wire envelope shared with the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub kind: EventKind,
    pub source: String,
    pub event: DomainEvent,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: event.kind(),
            source: EVENT_SOURCE.to_string(),
            event,
            timestamp,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Outbound hook towards the message bus (or an in-process fan-out).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, envelope: EventEnvelope) -> Result<(), PublishError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Publishes every event, logging failures instead of surfacing them. Returns
/// the number of events that could not be handed to the transport.
pub fn publish_all(
    publisher: &dyn EventPublisher,
    events: impl IntoIterator<Item = DomainEvent>,
    at: DateTime<Utc>,
    correlation_id: Option<&str>,
) -> usize {
    let mut failed = 0;
    for event in events {
        let mut envelope = EventEnvelope::new(event, at);
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation(correlation_id);
        }
        let kind = envelope.kind;
        if let Err(err) = publisher.publish(envelope) {
            failed += 1;
            warn!(event = kind.label(), error = %err, "event publish failed");
        }
    }
    failed
}

/// Consumer-side handler. Implementations match exhaustively on [`DomainEvent`].
pub trait EventHandler: Send + Sync {
    fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("event handler failed: {0}")]
    Failed(String),
}

/// Envelope ids remembered by [`IdempotentConsumer::new`].
pub const DEFAULT_DEDUPE_WINDOW: usize = 4096;

/// Drops envelopes whose id was already applied successfully.
///
/// Only the most recent `window` ids are remembered. A redelivery older than
/// that is applied again, so size the window to at least the transport's
/// replay depth.
pub struct IdempotentConsumer<H> {
    handler: H,
    window: usize,
    applied: Mutex<AppliedIds>,
}

#[derive(Default)]
struct AppliedIds {
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl<H: EventHandler> IdempotentConsumer<H> {
    pub fn new(handler: H) -> Self {
        Self::with_window(handler, DEFAULT_DEDUPE_WINDOW)
    }

    pub fn with_window(handler: H, window: usize) -> Self {
        Self {
            handler,
            window: window.max(1),
            applied: Mutex::new(AppliedIds::default()),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns `Ok(false)` when the envelope is a duplicate delivery.
    pub fn deliver(&self, envelope: &EventEnvelope) -> Result<bool, HandlerError> {
        let mut applied = self.applied.lock().expect("consumer mutex poisoned");
        if applied.seen.contains(&envelope.id) {
            return Ok(false);
        }
        self.handler.handle(envelope)?;
        applied.seen.insert(envelope.id);
        applied.order.push_back(envelope.id);
        while applied.order.len() > self.window {
            if let Some(oldest) = applied.order.pop_front() {
                applied.seen.remove(&oldest);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> DomainEvent {
        DomainEvent::BedAllocated {
            bed_id: BedId("bed-1".to_string()),
            occupant: OccupantRef("request:req-1".to_string()),
        }
    }

    #[test]
    fn envelope_carries_kind_source_and_correlation() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let envelope = EventEnvelope::new(sample_event(), at).with_correlation("batch-7");

        assert_eq!(envelope.kind, EventKind::BedAllocated);
        assert_eq!(envelope.source, EVENT_SOURCE);
        assert_eq!(envelope.correlation_id.as_deref(), Some("batch-7"));

        let json = serde_json::to_value(&envelope).expect("serializes");
        assert_eq!(json["event"]["type"], "BedAllocated");
        assert_eq!(json["event"]["payload"]["bed_id"], "bed-1");
    }

    struct FailingPublisher;

    impl EventPublisher for FailingPublisher {
        fn publish(&self, _envelope: EventEnvelope) -> Result<(), PublishError> {
            Err(PublishError::Transport("bus offline".to_string()))
        }
    }

    #[test]
    fn publish_all_counts_failures_without_aborting() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let failed = publish_all(&FailingPublisher, vec![sample_event(), sample_event()], at, None);
        assert_eq!(failed, 2);
    }

    #[derive(Default)]
    struct CountingHandler {
        handled: Mutex<usize>,
    }

    impl EventHandler for CountingHandler {
        fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
            *self.handled.lock().expect("counter mutex poisoned") += 1;
            Ok(())
        }
    }

    #[test]
    fn dedupe_window_forgets_the_oldest_ids() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let consumer = IdempotentConsumer::with_window(CountingHandler::default(), 2);
        let envelopes: Vec<_> = (0..3)
            .map(|_| EventEnvelope::new(sample_event(), at))
            .collect();

        for envelope in &envelopes {
            assert!(consumer.deliver(envelope).expect("first delivery"));
        }
        assert!(!consumer.deliver(&envelopes[2]).expect("recent duplicate"));
        assert!(!consumer.deliver(&envelopes[1]).expect("recent duplicate"));
        assert!(consumer.deliver(&envelopes[0]).expect("evicted id applies again"));

        let applied = consumer.applied.lock().expect("consumer mutex poisoned");
        assert_eq!(applied.seen.len(), 2);
        assert_eq!(applied.order.len(), 2);
        drop(applied);
        assert_eq!(
            *consumer.handler().handled.lock().expect("counter mutex poisoned"),
            4
        );
    }

    #[test]
    fn idempotent_consumer_skips_redelivered_envelopes() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let consumer = IdempotentConsumer::new(OccupancyProjection::default());
        let envelope = EventEnvelope::new(sample_event(), at);

        assert!(consumer.deliver(&envelope).expect("first delivery"));
        assert!(!consumer.deliver(&envelope).expect("duplicate delivery"));
        assert_eq!(
            consumer
                .handler()
                .occupant_of(&BedId("bed-1".to_string())),
            Some(OccupantRef("request:req-1".to_string()))
        );
    }
}
