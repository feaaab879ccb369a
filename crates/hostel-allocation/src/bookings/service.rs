use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use super::domain::{Booking, BookingId, BookingPatch, BookingStatus, NewBooking};
use super::overlap::OverlapValidator;
use super::repository::BookingRepository;
use crate::clock::Clock;
use crate::error::ServiceError;
use crate::events::{publish_all, DomainEvent, EventPublisher};
use crate::inventory::{BedId, BedLifecycleManager, BedStatus, OccupantRef};
use crate::storage::RepositoryError;

/// Dated stays on a bed. Exclusivity between stays is decided on dates alone;
/// the bed itself is only held or allocated for the stay in progress.
pub struct BookingService {
    repository: Arc<dyn BookingRepository>,
    validator: OverlapValidator,
    beds: Arc<BedLifecycleManager>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

impl BookingService {
    pub fn new(
        repository: Arc<dyn BookingRepository>,
        beds: Arc<BedLifecycleManager>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            validator: OverlapValidator::new(repository.clone()),
            repository,
            beds,
            events,
            clock,
            sequence: AtomicU64::new(1),
        }
    }

    pub fn validator(&self) -> &OverlapValidator {
        &self.validator
    }

    fn next_booking_id(&self) -> BookingId {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        BookingId(format!("bk-{id:06}"))
    }

    pub fn get(&self, id: &BookingId) -> Result<Booking, ServiceError> {
        self.repository
            .fetch(id)?
            .ok_or_else(|| ServiceError::not_found("booking", id))
    }

    /// Persists the booking in `HOLD`. A stay that covers today also holds
    /// the bed itself.
    pub fn create(&self, request: NewBooking) -> Result<Booking, ServiceError> {
        ensure_ordered(request.check_in, request.check_out)?;
        let bed_id = request.bed_id.clone();
        self.validator
            .with_bed_lock(&bed_id, || self.create_locked(request))
    }

    fn create_locked(&self, request: NewBooking) -> Result<Booking, ServiceError> {
        self.validator
            .ensure_available(&request.bed_id, request.check_in, request.check_out, None)?;
        self.ensure_not_seasonally_allocated(&request.bed_id)?;

        let id = self.next_booking_id();
        let bed_id = request.bed_id.clone();
        let occupant = OccupantRef::for_booking(&id);
        let now = self.clock.now();
        let holds_bed = covers(request.check_in, request.check_out, now.date_naive());
        if holds_bed {
            self.beds
                .hold(&bed_id, occupant.clone(), request.hold_ttl_seconds)?;
        }

        let booking = Booking {
            id,
            student_id: request.student_id,
            bed_id: request.bed_id,
            check_in: request.check_in,
            check_out: request.check_out,
            status: BookingStatus::Hold,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let stored = match self.repository.insert(booking) {
            Ok(stored) => stored,
            Err(err) => {
                if holds_bed {
                    self.compensate(&bed_id, &occupant);
                }
                return Err(err.into());
            }
        };

        info!(
            booking_id = %stored.id,
            bed_id = %stored.bed_id,
            check_in = %stored.check_in,
            check_out = %stored.check_out,
            holds_bed,
            "booking created"
        );
        self.emit(
            vec![DomainEvent::BookingCreated {
                booking_id: stored.id.clone(),
                bed_id: stored.bed_id.clone(),
                check_in: stored.check_in,
                check_out: stored.check_out,
            }],
            &stored.id,
        );
        Ok(stored)
    }

    /// Applies a date shift and/or status change.
    pub fn update(&self, id: &BookingId, patch: BookingPatch) -> Result<Booking, ServiceError> {
        let bed_id = self.get(id)?.bed_id;
        self.validator
            .with_bed_lock(&bed_id, || self.update_locked(id, patch))
    }

    fn update_locked(&self, id: &BookingId, patch: BookingPatch) -> Result<Booking, ServiceError> {
        let current = self.get(id)?;
        if patch.is_empty() {
            return Ok(current);
        }
        if current.status.is_terminal() {
            return Err(ServiceError::validation(format!(
                "booking {} is {} and can no longer change",
                id,
                current.status.label()
            )));
        }

        let today = self.clock.now().date_naive();
        let occupant = OccupantRef::for_booking(id);
        let mut next = current.clone();
        let mut events = Vec::new();
        let mut bound_bed = false;
        let mut unbind_bed = false;

        let dates_changed = patch.check_in.is_some_and(|d| d != current.check_in)
            || patch.check_out.is_some_and(|d| d != current.check_out);
        if dates_changed {
            if current.status == BookingStatus::CheckedIn {
                return Err(ServiceError::validation(
                    "dates of a checked-in booking cannot be shifted",
                ));
            }
            next.check_in = patch.check_in.unwrap_or(current.check_in);
            next.check_out = patch.check_out.unwrap_or(current.check_out);
            ensure_ordered(next.check_in, next.check_out)?;
            self.validator
                .ensure_available(&next.bed_id, next.check_in, next.check_out, Some(id))?;
            unbind_bed = !covers(next.check_in, next.check_out, today);
        }

        if let Some(status) = patch.status.filter(|status| *status != current.status) {
            if !current.status.can_transition_to(status) {
                return Err(ServiceError::validation(format!(
                    "booking cannot move from {} to {}",
                    current.status.label(),
                    status.label()
                )));
            }
            match status {
                BookingStatus::Confirmed => {
                    self.validator.ensure_available(
                        &next.bed_id,
                        next.check_in,
                        next.check_out,
                        Some(id),
                    )?;
                    self.ensure_not_seasonally_allocated(&next.bed_id)?;
                    if covers(next.check_in, next.check_out, today) {
                        bound_bed = self.bind_bed(&next.bed_id, &occupant)?;
                    }
                    events.push(DomainEvent::BookingConfirmed {
                        booking_id: id.clone(),
                        bed_id: next.bed_id.clone(),
                    });
                }
                BookingStatus::CheckedIn => {
                    bound_bed = self.bind_bed(&next.bed_id, &occupant)?;
                    unbind_bed = false;
                }
                BookingStatus::Cancelled => {
                    unbind_bed = true;
                    events.push(DomainEvent::BookingCancelled {
                        booking_id: id.clone(),
                        bed_id: next.bed_id.clone(),
                    });
                }
                BookingStatus::CheckedOut => unbind_bed = true,
                BookingStatus::Hold | BookingStatus::PendingPayment => {}
            }
            next.status = status;
        }

        next.updated_at = self.clock.now();
        let stored = match self.repository.update(next) {
            Ok(stored) => stored,
            Err(err) => {
                if bound_bed {
                    self.compensate(&current.bed_id, &occupant);
                }
                return Err(match err {
                    RepositoryError::Conflict => ServiceError::conflict(format!(
                        "booking {id} was modified concurrently"
                    )),
                    other => other.into(),
                });
            }
        };
        if unbind_bed {
            self.beds.release_occupant(&stored.bed_id, &occupant)?;
        }

        info!(
            booking_id = %stored.id,
            status = stored.status.label(),
            check_in = %stored.check_in,
            check_out = %stored.check_out,
            "booking updated"
        );
        self.emit(events, id);
        Ok(stored)
    }

    /// Allocates the bed to the booking. Returns whether this call created the
    /// binding, so a failed save knows what to undo.
    fn bind_bed(&self, bed_id: &BedId, occupant: &OccupantRef) -> Result<bool, ServiceError> {
        let bed = self.beds.bed(bed_id)?;
        let already_bound =
            bed.status() == BedStatus::Allocated && bed.occupant() == Some(occupant);
        self.beds.allocate(bed_id, occupant.clone())?;
        Ok(!already_bound)
    }

    /// A bed allocated to a request is taken for the rest of the rule's stay
    /// window, which bookings cannot see as dates.
    fn ensure_not_seasonally_allocated(&self, bed_id: &BedId) -> Result<(), ServiceError> {
        let bed = self.beds.bed(bed_id)?;
        match bed.occupant().and_then(OccupantRef::request_id) {
            Some(request_id) => Err(ServiceError::conflict(format!(
                "bed {bed_id} is allocated to request {request_id}"
            ))),
            None => Ok(()),
        }
    }

    fn compensate(&self, bed_id: &BedId, occupant: &OccupantRef) {
        match self.beds.release_occupant(bed_id, occupant) {
            Ok(_) => warn!(
                bed_id = %bed_id,
                occupant = %occupant,
                "bed released after failed booking save"
            ),
            Err(err) => warn!(
                bed_id = %bed_id,
                occupant = %occupant,
                error = %err,
                "compensating release failed"
            ),
        }
    }

    fn emit(&self, events: Vec<DomainEvent>, id: &BookingId) {
        publish_all(
            self.events.as_ref(),
            events,
            self.clock.now(),
            Some(id.0.as_str()),
        );
    }
}

fn ensure_ordered(check_in: NaiveDate, check_out: NaiveDate) -> Result<(), ServiceError> {
    if check_in >= check_out {
        return Err(ServiceError::validation(format!(
            "check-in {check_in} must be before check-out {check_out}"
        )));
    }
    Ok(())
}

/// The half-open stay `[check_in, check_out)` includes `day`.
fn covers(check_in: NaiveDate, check_out: NaiveDate, day: NaiveDate) -> bool {
    check_in <= day && day < check_out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::allocation::rules::StudentId;
    use crate::allocation::RequestId;
    use crate::clock::ManualClock;
    use crate::events::{EventKind, InMemoryEventLog};
    use crate::inventory::{
        BedStatus, GenderPolicy, HoldPolicy, Hostel, HostelId, InventoryCatalog, Room, RoomId,
        RoomStatus, RoomType,
    };
    use crate::storage::{InMemoryBookingRepository, InMemoryInventoryRepository};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Barrier;

    pub(crate) struct BookingFixture {
        pub(crate) service: Arc<BookingService>,
        pub(crate) beds: Arc<BedLifecycleManager>,
        pub(crate) clock: Arc<ManualClock>,
        pub(crate) events: InMemoryEventLog,
    }

    pub(crate) fn fixture() -> BookingFixture {
        let inventory = Arc::new(InMemoryInventoryRepository::default());
        let events = InMemoryEventLog::default();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2023, 12, 20, 10, 0, 0).unwrap(),
        ));

        let catalog = InventoryCatalog::new(inventory.clone());
        catalog
            .add_hostel(Hostel {
                id: HostelId("h-north".into()),
                name: "North Block".into(),
                campus: "Main".into(),
                capacity: 2,
                amenities: Vec::new(),
                active: true,
            })
            .expect("hostel");
        catalog
            .add_room(Room {
                id: RoomId("r-101".into()),
                hostel_id: HostelId("h-north".into()),
                number: "101".into(),
                room_type: RoomType::Double,
                gender_policy: GenderPolicy::Any,
                status: RoomStatus::Open,
                floor: 1,
            })
            .expect("room");
        for bed_no in ["A", "B"] {
            catalog
                .add_bed(&RoomId("r-101".into()), bed_no)
                .expect("bed");
        }

        let beds = Arc::new(BedLifecycleManager::new(
            inventory,
            Arc::new(events.clone()),
            clock.clone(),
            HoldPolicy::default(),
        ));
        let service = Arc::new(BookingService::new(
            Arc::new(InMemoryBookingRepository::default()),
            beds.clone(),
            Arc::new(events.clone()),
            clock.clone(),
        ));

        BookingFixture {
            service,
            beds,
            clock,
            events,
        }
    }

    pub(crate) fn service_fixture() -> (Arc<BookingService>, InMemoryEventLog) {
        let fx = fixture();
        (fx.service, fx.events)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn new_booking(student: &str, bed: &str, start: NaiveDate, end: NaiveDate) -> NewBooking {
        NewBooking {
            student_id: StudentId(student.to_string()),
            bed_id: BedId(bed.to_string()),
            check_in: start,
            check_out: end,
            hold_ttl_seconds: None,
        }
    }

    fn status(next: BookingStatus) -> BookingPatch {
        BookingPatch {
            status: Some(next),
            ..BookingPatch::default()
        }
    }

    fn today() -> NaiveDate {
        date(2023, 12, 20)
    }

    fn confirm(fx: &BookingFixture, id: &BookingId) -> Result<Booking, ServiceError> {
        fx.service
            .update(id, status(BookingStatus::PendingPayment))?;
        fx.service.update(id, status(BookingStatus::Confirmed))
    }

    fn bed_status(fx: &BookingFixture, bed: &str) -> BedStatus {
        fx.beds.bed(&BedId(bed.to_string())).expect("bed").status()
    }

    #[test]
    fn stay_in_progress_holds_the_bed() {
        let fx = fixture();
        let booking = fx
            .service
            .create(new_booking("stu-1", "r-101-A", today(), date(2024, 1, 20)))
            .expect("created");

        assert_eq!(booking.status, BookingStatus::Hold);
        let bed = fx.beds.bed(&booking.bed_id).expect("bed");
        assert_eq!(bed.status(), BedStatus::OnHold);
        assert_eq!(bed.occupant(), Some(&OccupantRef::for_booking(&booking.id)));
        assert_eq!(fx.events.count(EventKind::BookingCreated), 1);
    }

    #[test]
    fn future_stay_binds_the_bed_only_at_check_in() {
        let fx = fixture();
        let booking = fx
            .service
            .create(new_booking("stu-1", "r-101-A", date(2024, 1, 1), date(2024, 2, 1)))
            .expect("created");
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::Available);

        confirm(&fx, &booking.id).expect("confirmed");
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::Available);

        fx.clock.advance(Duration::days(12));
        fx.service
            .update(&booking.id, status(BookingStatus::CheckedIn))
            .expect("checked in");
        let bed = fx.beds.bed(&booking.bed_id).expect("bed");
        assert_eq!(bed.status(), BedStatus::Allocated);
        assert_eq!(bed.occupant(), Some(&OccupantRef::for_booking(&booking.id)));

        fx.service
            .update(&booking.id, status(BookingStatus::CheckedOut))
            .expect("checked out");
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::Available);
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let fx = fixture();
        let result = fx
            .service
            .create(new_booking("stu-1", "r-101-A", date(2024, 2, 1), date(2024, 2, 1)));
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn full_stay_allocates_then_frees_the_bed() {
        let fx = fixture();
        let booking = fx
            .service
            .create(new_booking("stu-1", "r-101-A", today(), date(2024, 2, 1)))
            .expect("created");

        let confirmed = confirm(&fx, &booking.id).expect("confirmed");
        assert_eq!(confirmed.version, 2);
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::Allocated);

        fx.service
            .update(&booking.id, status(BookingStatus::CheckedIn))
            .expect("checked in");
        let done = fx
            .service
            .update(&booking.id, status(BookingStatus::CheckedOut))
            .expect("checked out");

        assert_eq!(done.status, BookingStatus::CheckedOut);
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::Available);
        assert_eq!(fx.events.count(EventKind::BookingConfirmed), 1);
    }

    #[test]
    fn confirm_after_hold_lapse_reallocates_a_free_bed() {
        let fx = fixture();
        let booking = fx
            .service
            .create(new_booking("stu-1", "r-101-A", today(), date(2024, 2, 1)))
            .expect("created");
        fx.service
            .update(&booking.id, status(BookingStatus::PendingPayment))
            .expect("pending payment");

        fx.clock.advance(Duration::minutes(10));
        fx.beds.sweep_expired_holds().expect("sweep");

        let confirmed = fx
            .service
            .update(&booking.id, status(BookingStatus::Confirmed))
            .expect("bed still free");
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::Allocated);
    }

    #[test]
    fn confirm_fails_when_bed_was_taken_after_hold_lapsed() {
        let fx = fixture();
        let booking = fx
            .service
            .create(new_booking("stu-1", "r-101-A", today(), date(2024, 2, 1)))
            .expect("created");
        fx.service
            .update(&booking.id, status(BookingStatus::PendingPayment))
            .expect("pending payment");

        fx.clock.advance(Duration::minutes(10));
        fx.beds
            .hold(&booking.bed_id, OccupantRef("booking:walk-in".into()), None)
            .expect("someone else holds");

        let result = fx
            .service
            .update(&booking.id, status(BookingStatus::Confirmed));
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(
            fx.service.get(&booking.id).expect("booking").status,
            BookingStatus::PendingPayment
        );
    }

    #[test]
    fn cancel_releases_only_our_own_binding() {
        let fx = fixture();
        let booking = fx
            .service
            .create(new_booking("stu-1", "r-101-A", today(), date(2024, 2, 1)))
            .expect("created");

        let cancelled = fx
            .service
            .update(&booking.id, status(BookingStatus::Cancelled))
            .expect("cancelled");
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::Available);
        assert_eq!(fx.events.count(EventKind::BookingCancelled), 1);

        let again = fx
            .service
            .update(&booking.id, status(BookingStatus::PendingPayment));
        assert!(matches!(again, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn consecutive_stays_share_a_bed_and_overlaps_are_rejected() {
        let fx = fixture();
        let january = fx
            .service
            .create(new_booking("stu-1", "r-101-B", date(2024, 1, 1), date(2024, 2, 1)))
            .expect("january");
        confirm(&fx, &january.id).expect("confirmed");

        let february = fx
            .service
            .create(new_booking("stu-2", "r-101-B", date(2024, 2, 1), date(2024, 3, 1)))
            .expect("check-out day is free for the next stay");
        assert_eq!(february.status, BookingStatus::Hold);

        let straddling = fx
            .service
            .create(new_booking("stu-3", "r-101-B", date(2024, 1, 15), date(2024, 3, 1)));
        assert!(matches!(straddling, Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn first_confirmation_wins_between_overlapping_holds() {
        let fx = fixture();
        let first = fx
            .service
            .create(new_booking("stu-1", "r-101-A", date(2024, 1, 1), date(2024, 2, 1)))
            .expect("first");
        let second = fx
            .service
            .create(new_booking("stu-2", "r-101-A", date(2024, 1, 10), date(2024, 2, 10)))
            .expect("holds do not block each other");

        confirm(&fx, &first.id).expect("first confirmed");
        let late = confirm(&fx, &second.id);
        assert!(matches!(late, Err(ServiceError::Conflict(_))));
        assert_eq!(
            fx.service.get(&second.id).expect("second").status,
            BookingStatus::PendingPayment
        );
    }

    #[test]
    fn concurrent_confirmations_of_overlapping_stays_admit_one() {
        let fx = fixture();
        let ids: Vec<BookingId> = (0..4)
            .map(|n| {
                let booking = fx
                    .service
                    .create(new_booking(
                        &format!("stu-{n}"),
                        "r-101-A",
                        date(2024, 1, 1 + n),
                        date(2024, 2, 1),
                    ))
                    .expect("created");
                fx.service
                    .update(&booking.id, status(BookingStatus::PendingPayment))
                    .expect("pending payment");
                booking.id
            })
            .collect();

        let barrier = Barrier::new(ids.len());
        let confirmed = std::thread::scope(|scope| {
            let handles: Vec<_> = ids
                .iter()
                .map(|id| {
                    let service = &fx.service;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        service.update(id, status(BookingStatus::Confirmed)).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("confirm thread"))
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(confirmed, 1);
        let active = ids
            .iter()
            .filter(|id| fx.service.get(id).expect("booking").status.is_active())
            .count();
        assert_eq!(active, 1);
    }

    #[test]
    fn date_shift_is_checked_against_other_active_bookings() {
        let fx = fixture();
        let first = fx
            .service
            .create(new_booking("stu-1", "r-101-A", date(2024, 1, 1), date(2024, 2, 1)))
            .expect("created");
        confirm(&fx, &first.id).expect("confirmed");

        let second = fx
            .service
            .create(new_booking("stu-2", "r-101-A", date(2024, 2, 1), date(2024, 3, 1)))
            .expect("same bed, later stay");

        let earlier = fx.service.update(
            &second.id,
            BookingPatch {
                check_in: Some(date(2024, 1, 20)),
                ..BookingPatch::default()
            },
        );
        assert!(matches!(earlier, Err(ServiceError::Conflict(_))));

        let moved = fx
            .service
            .update(
                &second.id,
                BookingPatch {
                    check_in: Some(date(2024, 2, 5)),
                    check_out: Some(date(2024, 3, 5)),
                    status: None,
                },
            )
            .expect("shifted");
        assert_eq!(moved.check_in, date(2024, 2, 5));
    }

    #[test]
    fn checked_in_stay_cannot_shift_dates() {
        let fx = fixture();
        let booking = fx
            .service
            .create(new_booking("stu-1", "r-101-A", today(), date(2024, 1, 20)))
            .expect("created");
        confirm(&fx, &booking.id).expect("confirmed");
        fx.service
            .update(&booking.id, status(BookingStatus::CheckedIn))
            .expect("checked in");

        let shifted = fx.service.update(
            &booking.id,
            BookingPatch {
                check_out: Some(date(2024, 2, 15)),
                ..BookingPatch::default()
            },
        );
        assert!(matches!(shifted, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn shifting_a_held_stay_into_the_future_frees_the_bed() {
        let fx = fixture();
        let booking = fx
            .service
            .create(new_booking("stu-1", "r-101-A", today(), date(2024, 1, 20)))
            .expect("created");
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::OnHold);

        fx.service
            .update(
                &booking.id,
                BookingPatch {
                    check_in: Some(date(2024, 2, 1)),
                    check_out: Some(date(2024, 3, 1)),
                    status: None,
                },
            )
            .expect("shifted");
        assert_eq!(bed_status(&fx, "r-101-A"), BedStatus::Available);
    }

    #[test]
    fn bed_allocated_to_a_request_refuses_bookings_for_any_dates() {
        let fx = fixture();
        fx.beds
            .allocate(
                &BedId("r-101-B".into()),
                OccupantRef::for_request(&RequestId("req-000009".into())),
            )
            .expect("allocated to request");

        let result = fx
            .service
            .create(new_booking("stu-1", "r-101-B", date(2024, 5, 1), date(2024, 6, 1)));
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
    }
}
