use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{
    Bed, BedGuard, BedId, BedState, BedStatus, Hostel, OccupantRef, Room, RoomId, RoomStatus,
};
use super::repository::{CasOutcome, InventoryRepository};
use crate::clock::Clock;
use crate::config::AllocationConfig;
use crate::error::ServiceError;
use crate::events::{publish_all, DomainEvent, EventPublisher};

/// Default and upper bound for hold time-to-live, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldPolicy {
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
}

impl From<&AllocationConfig> for HoldPolicy {
    fn from(config: &AllocationConfig) -> Self {
        Self {
            default_ttl_secs: config.default_hold_ttl_secs,
            max_ttl_secs: config.max_hold_ttl_secs,
        }
    }
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self::from(&AllocationConfig::default())
    }
}

/// Outcome counters of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub lost_races: usize,
    pub errors: usize,
}

/// A bed together with the room and hostel it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BedPlacement {
    pub hostel: Hostel,
    pub room: Room,
    pub bed: Bed,
}

/// Owns every state transition of a bed.
///
/// All transitions go through [`InventoryRepository::compare_and_swap`]; the
/// manager never writes a state it computed from an earlier read without a
/// guard, so the store is the final authority on who wins a race.
pub struct BedLifecycleManager {
    repository: Arc<dyn InventoryRepository>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl BedLifecycleManager {
    pub fn new(
        repository: Arc<dyn InventoryRepository>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: HoldPolicy,
    ) -> Self {
        Self {
            repository,
            events,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> HoldPolicy {
        self.policy
    }

    pub fn bed(&self, bed_id: &BedId) -> Result<Bed, ServiceError> {
        self.repository
            .bed(bed_id)?
            .ok_or_else(|| ServiceError::not_found("bed", bed_id))
    }

    pub fn locate(&self, bed_id: &BedId) -> Result<BedPlacement, ServiceError> {
        let bed = self.bed(bed_id)?;
        let room = self
            .repository
            .room(&bed.room_id)?
            .ok_or_else(|| ServiceError::not_found("room", &bed.room_id))?;
        let hostel = self
            .repository
            .hostel(&room.hostel_id)?
            .ok_or_else(|| ServiceError::not_found("hostel", &room.hostel_id))?;
        Ok(BedPlacement { hostel, room, bed })
    }

    pub fn beds_in_room(&self, room_id: &RoomId) -> Result<Vec<Bed>, ServiceError> {
        if self.repository.room(room_id)?.is_none() {
            return Err(ServiceError::not_found("room", room_id));
        }
        Ok(self.repository.beds_in_room(room_id)?)
    }

    /// Beds that a hold attempt would currently succeed on. Holds that have
    /// lapsed but not been swept yet count as available.
    pub fn available_beds_in_room(&self, room_id: &RoomId) -> Result<Vec<Bed>, ServiceError> {
        let now = self.clock.now();
        Ok(self
            .beds_in_room(room_id)?
            .into_iter()
            .filter(|bed| is_free(&bed.state, now))
            .collect())
    }

    /// Every free bed in an open room of an active hostel.
    pub fn open_placements(&self) -> Result<Vec<BedPlacement>, ServiceError> {
        let now = self.clock.now();
        let mut placements = Vec::new();
        for bed in self.repository.all_beds()? {
            if !is_free(&bed.state, now) {
                continue;
            }
            let Some(room) = self.repository.room(&bed.room_id)? else {
                continue;
            };
            if room.status != RoomStatus::Open {
                continue;
            }
            let Some(hostel) = self.repository.hostel(&room.hostel_id)? else {
                continue;
            };
            if hostel.active {
                placements.push(BedPlacement { hostel, room, bed });
            }
        }
        Ok(placements)
    }

    pub fn occupied_beds(&self) -> Result<Vec<Bed>, ServiceError> {
        Ok(self
            .repository
            .all_beds()?
            .into_iter()
            .filter(|bed| bed.occupant().is_some())
            .collect())
    }

    pub fn bed_counts(&self) -> Result<Vec<(BedStatus, usize)>, ServiceError> {
        let beds = self.repository.all_beds()?;
        Ok([
            BedStatus::Available,
            BedStatus::OnHold,
            BedStatus::Allocated,
            BedStatus::Blocked,
        ]
        .into_iter()
        .map(|status| {
            let count = beds.iter().filter(|bed| bed.status() == status).count();
            (status, count)
        })
        .collect())
    }

    /// Places a time-bounded hold on an available bed.
    pub fn hold(
        &self,
        bed_id: &BedId,
        occupant: OccupantRef,
        ttl_secs: Option<u64>,
    ) -> Result<Bed, ServiceError> {
        let ttl_secs = ttl_secs.unwrap_or(self.policy.default_ttl_secs);
        if ttl_secs == 0 || ttl_secs > self.policy.max_ttl_secs {
            return Err(ServiceError::validation(format!(
                "hold ttl must be between 1 and {} seconds (got {ttl_secs})",
                self.policy.max_ttl_secs
            )));
        }

        let placement = self.locate(bed_id)?;
        ensure_bookable(&placement)?;

        let now = self.clock.now();
        self.expire_stale_hold(&placement.bed, now)?;

        let hold_expires_at = now + Duration::seconds(ttl_secs as i64);
        let next = BedState::OnHold {
            occupant: occupant.clone(),
            hold_expires_at,
        };

        match self.repository.compare_and_swap(
            bed_id,
            &BedGuard::Status(BedStatus::Available),
            next,
        )? {
            CasOutcome::Applied { bed, .. } => {
                info!(bed_id = %bed_id, occupant = %occupant, %hold_expires_at, "bed held");
                self.emit(
                    vec![DomainEvent::BedHeld {
                        bed_id: bed_id.clone(),
                        occupant,
                        hold_expires_at,
                    }],
                    now,
                );
                Ok(bed)
            }
            CasOutcome::Rejected { current } => Err(ServiceError::conflict(format!(
                "bed {} is {} and cannot be held",
                bed_id,
                current.status().label()
            ))),
        }
    }

    /// Binds a bed to an occupant for good. Converts the occupant's own hold.
    pub fn allocate(&self, bed_id: &BedId, occupant: OccupantRef) -> Result<Bed, ServiceError> {
        let placement = self.locate(bed_id)?;
        ensure_bookable(&placement)?;

        let now = self.clock.now();
        self.expire_stale_hold(&placement.bed, now)?;

        match self.repository.compare_and_swap(
            bed_id,
            &BedGuard::AllocatableBy(occupant.clone()),
            BedState::Allocated {
                occupant: occupant.clone(),
            },
        )? {
            CasOutcome::Applied { bed, .. } => {
                info!(bed_id = %bed_id, occupant = %occupant, "bed allocated");
                self.emit(
                    vec![DomainEvent::BedAllocated {
                        bed_id: bed_id.clone(),
                        occupant,
                    }],
                    now,
                );
                Ok(bed)
            }
            CasOutcome::Rejected { current } => match &current.state {
                BedState::Allocated { occupant: owner } if owner == &occupant => Ok(current),
                BedState::OnHold { occupant: holder, .. } => Err(ServiceError::conflict(format!(
                    "bed {} is on hold for {}",
                    bed_id, holder
                ))),
                state => Err(ServiceError::validation(format!(
                    "bed {} is {} and cannot be allocated",
                    bed_id,
                    state.status().label()
                ))),
            },
        }
    }

    /// Frees a bed from any state. Releasing an available bed is a no-op.
    pub fn release(&self, bed_id: &BedId) -> Result<Bed, ServiceError> {
        let now = self.clock.now();
        match self
            .repository
            .compare_and_swap(bed_id, &BedGuard::Any, BedState::Available)
        {
            Ok(CasOutcome::Applied { previous, bed }) => {
                if previous != BedState::Available {
                    info!(bed_id = %bed_id, from = previous.status().label(), "bed released");
                    self.emit(
                        vec![DomainEvent::BedReleased {
                            bed_id: bed_id.clone(),
                            previous_occupant: previous.occupant().cloned(),
                        }],
                        now,
                    );
                }
                Ok(bed)
            }
            Ok(CasOutcome::Rejected { current }) => Ok(current),
            Err(crate::storage::RepositoryError::NotFound) => {
                Err(ServiceError::not_found("bed", bed_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Releases the bed only while `occupant` still holds or owns it.
    /// Returns `None` when someone else has taken over in the meantime.
    pub fn release_occupant(
        &self,
        bed_id: &BedId,
        occupant: &OccupantRef,
    ) -> Result<Option<Bed>, ServiceError> {
        let now = self.clock.now();
        match self.repository.compare_and_swap(
            bed_id,
            &BedGuard::OccupiedBy(occupant.clone()),
            BedState::Available,
        )? {
            CasOutcome::Applied { bed, .. } => {
                info!(bed_id = %bed_id, occupant = %occupant, "bed released by occupant");
                self.emit(
                    vec![DomainEvent::BedReleased {
                        bed_id: bed_id.clone(),
                        previous_occupant: Some(occupant.clone()),
                    }],
                    now,
                );
                Ok(Some(bed))
            }
            CasOutcome::Rejected { current } => {
                debug!(
                    bed_id = %bed_id,
                    occupant = %occupant,
                    status = current.status().label(),
                    "occupant no longer binds bed, release skipped"
                );
                Ok(None)
            }
        }
    }

    /// Administrative override; displaces any occupant.
    pub fn block(&self, bed_id: &BedId) -> Result<Bed, ServiceError> {
        let now = self.clock.now();
        match self
            .repository
            .compare_and_swap(bed_id, &BedGuard::Any, BedState::Blocked)?
        {
            CasOutcome::Applied { previous, bed } => {
                warn!(bed_id = %bed_id, from = previous.status().label(), "bed blocked");
                if let Some(occupant) = previous.occupant() {
                    self.emit(
                        vec![DomainEvent::BedReleased {
                            bed_id: bed_id.clone(),
                            previous_occupant: Some(occupant.clone()),
                        }],
                        now,
                    );
                }
                Ok(bed)
            }
            CasOutcome::Rejected { current } => Ok(current),
        }
    }

    pub fn unblock(&self, bed_id: &BedId) -> Result<Bed, ServiceError> {
        match self.repository.compare_and_swap(
            bed_id,
            &BedGuard::Status(BedStatus::Blocked),
            BedState::Available,
        )? {
            CasOutcome::Applied { bed, .. } => {
                info!(bed_id = %bed_id, "bed unblocked");
                Ok(bed)
            }
            CasOutcome::Rejected { current } => Err(ServiceError::validation(format!(
                "bed {} is {}, only BLOCKED beds can be unblocked",
                bed_id,
                current.status().label()
            ))),
        }
    }

    /// Releases every hold whose expiry has passed. Per-bed failures are
    /// counted and logged; the sweep always visits every candidate.
    pub fn sweep_expired_holds(&self) -> Result<SweepReport, ServiceError> {
        let now = self.clock.now();
        let candidates = self.repository.expired_holds(now)?;
        let mut report = SweepReport::default();

        for bed in candidates {
            match self.expire_hold(&bed, now) {
                Ok(true) => report.expired += 1,
                Ok(false) => report.lost_races += 1,
                Err(err) => {
                    report.errors += 1;
                    warn!(bed_id = %bed.id, error = %err, "hold expiry failed");
                }
            }
        }

        if report.expired > 0 || report.errors > 0 {
            info!(
                expired = report.expired,
                lost_races = report.lost_races,
                errors = report.errors,
                "expired holds swept"
            );
        }
        Ok(report)
    }

    fn expire_stale_hold(&self, bed: &Bed, now: DateTime<Utc>) -> Result<(), ServiceError> {
        if bed.state.is_expired_hold(now) {
            self.expire_hold(bed, now)?;
        }
        Ok(())
    }

    /// Returns `false` when the hold changed between the read and the update.
    fn expire_hold(&self, bed: &Bed, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        let Some(occupant) = bed.occupant().cloned() else {
            return Ok(false);
        };
        match self.repository.compare_and_swap(
            &bed.id,
            &BedGuard::Exact(bed.state.clone()),
            BedState::Available,
        )? {
            CasOutcome::Applied { .. } => {
                debug!(bed_id = %bed.id, occupant = %occupant, "hold expired");
                self.emit(
                    vec![DomainEvent::BedHoldExpired {
                        bed_id: bed.id.clone(),
                        occupant,
                    }],
                    now,
                );
                Ok(true)
            }
            CasOutcome::Rejected { .. } => Ok(false),
        }
    }

    fn emit(&self, events: Vec<DomainEvent>, now: DateTime<Utc>) {
        publish_all(self.events.as_ref(), events, now, None);
    }
}

fn is_free(state: &BedState, now: DateTime<Utc>) -> bool {
    matches!(state, BedState::Available) || state.is_expired_hold(now)
}

fn ensure_bookable(placement: &BedPlacement) -> Result<(), ServiceError> {
    if placement.room.status != RoomStatus::Open {
        return Err(ServiceError::validation(format!(
            "room {} is not open for occupancy",
            placement.room.number
        )));
    }
    if !placement.hostel.active {
        return Err(ServiceError::validation(format!(
            "hostel {} is inactive",
            placement.hostel.name
        )));
    }
    Ok(())
}
