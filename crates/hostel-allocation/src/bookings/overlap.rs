use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use super::domain::BookingId;
use super::repository::BookingRepository;
use crate::allocation::locks::KeyedLocks;
use crate::error::ServiceError;
use crate::inventory::BedId;

/// Half-open ranges `[a_start, a_end)` and `[b_start, b_end)` intersect.
pub fn ranges_overlap(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Date-range exclusivity for a bed, evaluated against active bookings only.
///
/// Clones share one lock per bed. Anything that checks for a conflict and then
/// commits a claim on the bed does both under [`OverlapValidator::with_bed_lock`].
#[derive(Clone)]
pub struct OverlapValidator {
    repository: Arc<dyn BookingRepository>,
    bed_locks: Arc<KeyedLocks<BedId>>,
}

impl OverlapValidator {
    pub fn new(repository: Arc<dyn BookingRepository>) -> Self {
        Self {
            repository,
            bed_locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Runs `f` while holding the lock for `bed_id`. Not reentrant.
    pub fn with_bed_lock<R>(&self, bed_id: &BedId, f: impl FnOnce() -> R) -> R {
        self.bed_locks.with_lock(bed_id, f)
    }

    pub fn has_conflict(
        &self,
        bed_id: &BedId,
        start: NaiveDate,
        end: NaiveDate,
        exclude: Option<&BookingId>,
    ) -> Result<bool, ServiceError> {
        let conflict = self
            .repository
            .for_bed(bed_id)?
            .into_iter()
            .filter(|booking| booking.status.is_active())
            .filter(|booking| Some(&booking.id) != exclude)
            .find(|booking| ranges_overlap(booking.check_in, booking.check_out, start, end));

        if let Some(existing) = &conflict {
            debug!(
                bed_id = %bed_id,
                existing = %existing.id,
                %start,
                %end,
                "booking range overlaps"
            );
        }
        Ok(conflict.is_some())
    }

    pub fn ensure_available(
        &self,
        bed_id: &BedId,
        start: NaiveDate,
        end: NaiveDate,
        exclude: Option<&BookingId>,
    ) -> Result<(), ServiceError> {
        if self.has_conflict(bed_id, start, end, exclude)? {
            return Err(ServiceError::conflict(format!(
                "bed {bed_id} is already booked between {start} and {end}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::rules::StudentId;
    use crate::bookings::{Booking, BookingStatus};
    use crate::storage::InMemoryBookingRepository;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn booking(id: &str, start: NaiveDate, end: NaiveDate, status: BookingStatus) -> Booking {
        let at = Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap();
        Booking {
            id: BookingId(id.to_string()),
            student_id: StudentId("stu-1".to_string()),
            bed_id: BedId("bed-1".to_string()),
            check_in: start,
            check_out: end,
            status,
            created_at: at,
            updated_at: at,
            version: 0,
        }
    }

    fn validator_with(bookings: Vec<Booking>) -> OverlapValidator {
        let repository = Arc::new(InMemoryBookingRepository::default());
        for booking in bookings {
            repository.insert(booking).expect("insert");
        }
        OverlapValidator::new(repository)
    }

    #[test]
    fn overlapping_range_is_rejected_and_adjacent_range_accepted() {
        let validator = validator_with(vec![booking(
            "bk-1",
            date(2024, 1, 1),
            date(2024, 2, 1),
            BookingStatus::Confirmed,
        )]);
        let bed = BedId("bed-1".to_string());

        assert!(validator
            .has_conflict(&bed, date(2024, 1, 15), date(2024, 3, 1), None)
            .expect("check"));
        assert!(!validator
            .has_conflict(&bed, date(2024, 2, 1), date(2024, 3, 1), None)
            .expect("check"));
        assert!(matches!(
            validator.ensure_available(&bed, date(2024, 1, 15), date(2024, 3, 1), None),
            Err(ServiceError::Conflict(_))
        ));
    }

    #[test]
    fn inactive_bookings_and_excluded_id_are_ignored() {
        let validator = validator_with(vec![
            booking("bk-1", date(2024, 1, 1), date(2024, 2, 1), BookingStatus::Hold),
            booking("bk-2", date(2024, 1, 1), date(2024, 2, 1), BookingStatus::Cancelled),
            booking("bk-3", date(2024, 1, 1), date(2024, 2, 1), BookingStatus::CheckedIn),
        ]);
        let bed = BedId("bed-1".to_string());

        assert!(validator
            .has_conflict(&bed, date(2024, 1, 10), date(2024, 1, 20), None)
            .expect("check"));
        assert!(!validator
            .has_conflict(
                &bed,
                date(2024, 1, 10),
                date(2024, 1, 20),
                Some(&BookingId("bk-3".to_string()))
            )
            .expect("check"));
    }

    #[test]
    fn other_beds_never_conflict() {
        let validator = validator_with(vec![booking(
            "bk-1",
            date(2024, 1, 1),
            date(2024, 2, 1),
            BookingStatus::Confirmed,
        )]);
        assert!(!validator
            .has_conflict(
                &BedId("bed-2".to_string()),
                date(2024, 1, 1),
                date(2024, 2, 1),
                None
            )
            .expect("check"));
    }
}
