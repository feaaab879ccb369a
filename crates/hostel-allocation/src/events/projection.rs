use std::collections::HashMap;
use std::sync::Mutex;

use super::{DomainEvent, EventEnvelope, EventHandler, HandlerError};
use crate::inventory::{BedId, OccupantRef};

/// Read model of which occupant currently binds each bed, rebuilt from bed events.
///
/// Downstream services (booking, pricing) keep a view like this one. Request and
/// booking events carry no occupancy change of their own, so they are ignored.
#[derive(Default)]
pub struct OccupancyProjection {
    occupants: Mutex<HashMap<BedId, OccupantRef>>,
}

impl OccupancyProjection {
    pub fn occupant_of(&self, bed_id: &BedId) -> Option<OccupantRef> {
        self.occupants
            .lock()
            .expect("projection mutex poisoned")
            .get(bed_id)
            .cloned()
    }

    pub fn occupied_count(&self) -> usize {
        self.occupants
            .lock()
            .expect("projection mutex poisoned")
            .len()
    }
}

impl EventHandler for OccupancyProjection {
    fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let mut occupants = self.occupants.lock().expect("projection mutex poisoned");
        match &envelope.event {
            DomainEvent::BedHeld {
                bed_id, occupant, ..
            }
            | DomainEvent::BedAllocated { bed_id, occupant } => {
                if let Some(existing) = occupants.get(bed_id) {
                    if existing != occupant {
                        return Err(HandlerError::Failed(format!(
                            "bed {} already bound to {}",
                            bed_id.0, existing.0
                        )));
                    }
                }
                occupants.insert(bed_id.clone(), occupant.clone());
            }
            DomainEvent::BedReleased { bed_id, .. } | DomainEvent::BedHoldExpired { bed_id, .. } => {
                occupants.remove(bed_id);
            }
            DomainEvent::AllocationRequestCreated { .. }
            | DomainEvent::AllocationRequestApproved { .. }
            | DomainEvent::AllocationRequestRejected { .. }
            | DomainEvent::AllocationRequestWaitlisted { .. }
            | DomainEvent::AllocationRequestAllocated { .. }
            | DomainEvent::AllocationRequestCancelled { .. }
            | DomainEvent::BookingCreated { .. }
            | DomainEvent::BookingConfirmed { .. }
            | DomainEvent::BookingCancelled { .. } => {}
        }
        Ok(())
    }
}
