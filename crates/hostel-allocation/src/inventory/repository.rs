use chrono::{DateTime, Utc};

use super::domain::{Bed, BedGuard, BedId, BedState, Hostel, HostelId, Room, RoomId};
use crate::storage::RepositoryError;

/// Result of a conditional bed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The guard held; the bed now carries the new state and a bumped version.
    Applied { previous: BedState, bed: Bed },
    /// The guard failed; nothing changed.
    Rejected { current: Bed },
}

/// Storage for the hostel → room → bed hierarchy.
///
/// `compare_and_swap` is the only way bed state changes. Implementations must
/// evaluate the guard and write the new state as one atomic step so that
/// concurrent callers are serialized by the store, not by application memory.
pub trait InventoryRepository: Send + Sync {
    fn insert_hostel(&self, hostel: Hostel) -> Result<Hostel, RepositoryError>;
    /// Fails with `Conflict` when the hostel already has a room with that number.
    fn insert_room(&self, room: Room) -> Result<Room, RepositoryError>;
    /// Fails with `Conflict` when the room already has a bed with that number.
    fn insert_bed(&self, bed: Bed) -> Result<Bed, RepositoryError>;

    fn hostel(&self, id: &HostelId) -> Result<Option<Hostel>, RepositoryError>;
    fn room(&self, id: &RoomId) -> Result<Option<Room>, RepositoryError>;
    fn bed(&self, id: &BedId) -> Result<Option<Bed>, RepositoryError>;

    fn rooms_in_hostel(&self, id: &HostelId) -> Result<Vec<Room>, RepositoryError>;
    fn beds_in_room(&self, id: &RoomId) -> Result<Vec<Bed>, RepositoryError>;
    fn all_beds(&self) -> Result<Vec<Bed>, RepositoryError>;
    fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Bed>, RepositoryError>;

    fn compare_and_swap(
        &self,
        id: &BedId,
        guard: &BedGuard,
        next: BedState,
    ) -> Result<CasOutcome, RepositoryError>;
}
