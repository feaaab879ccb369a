use super::domain::{Booking, BookingId};
use crate::inventory::BedId;
use crate::storage::RepositoryError;

/// Booking storage with optimistic concurrency on updates.
pub trait BookingRepository: Send + Sync {
    fn insert(&self, booking: Booking) -> Result<Booking, RepositoryError>;
    /// Stores `booking` when its `version` matches the stored one, returning the
    /// record with the bumped version. A mismatch is a `Conflict`.
    fn update(&self, booking: Booking) -> Result<Booking, RepositoryError>;
    fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;
    fn for_bed(&self, bed_id: &BedId) -> Result<Vec<Booking>, RepositoryError>;
}
