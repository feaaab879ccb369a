use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::inventory::{
    Bed, BedGuard, BedId, BedState, CasOutcome, Hostel, HostelId, InventoryRepository, Room,
    RoomId,
};

#[derive(Default)]
struct InventoryTables {
    hostels: HashMap<HostelId, Hostel>,
    rooms: HashMap<RoomId, Room>,
    beds: HashMap<BedId, Bed>,
}

#[derive(Default, Clone)]
pub struct InMemoryInventoryRepository {
    tables: Arc<Mutex<InventoryTables>>,
}

fn sorted_beds(mut beds: Vec<Bed>) -> Vec<Bed> {
    beds.sort_by(|a, b| (&a.room_id, &a.bed_no).cmp(&(&b.room_id, &b.bed_no)));
    beds
}

impl InventoryRepository for InMemoryInventoryRepository {
    fn insert_hostel(&self, hostel: Hostel) -> Result<Hostel, RepositoryError> {
        let mut tables = self.tables.lock().expect("inventory mutex poisoned");
        if tables.hostels.contains_key(&hostel.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.hostels.insert(hostel.id.clone(), hostel.clone());
        Ok(hostel)
    }

    fn insert_room(&self, room: Room) -> Result<Room, RepositoryError> {
        let mut tables = self.tables.lock().expect("inventory mutex poisoned");
        if !tables.hostels.contains_key(&room.hostel_id) {
            return Err(RepositoryError::NotFound);
        }
        let duplicate = tables.rooms.values().any(|existing| {
            existing.id == room.id
                || (existing.hostel_id == room.hostel_id && existing.number == room.number)
        });
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        tables.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    fn insert_bed(&self, bed: Bed) -> Result<Bed, RepositoryError> {
        let mut tables = self.tables.lock().expect("inventory mutex poisoned");
        if !tables.rooms.contains_key(&bed.room_id) {
            return Err(RepositoryError::NotFound);
        }
        let duplicate = tables.beds.values().any(|existing| {
            existing.id == bed.id || (existing.room_id == bed.room_id && existing.bed_no == bed.bed_no)
        });
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        tables.beds.insert(bed.id.clone(), bed.clone());
        Ok(bed)
    }

    fn hostel(&self, id: &HostelId) -> Result<Option<Hostel>, RepositoryError> {
        let tables = self.tables.lock().expect("inventory mutex poisoned");
        Ok(tables.hostels.get(id).cloned())
    }

    fn room(&self, id: &RoomId) -> Result<Option<Room>, RepositoryError> {
        let tables = self.tables.lock().expect("inventory mutex poisoned");
        Ok(tables.rooms.get(id).cloned())
    }

    fn bed(&self, id: &BedId) -> Result<Option<Bed>, RepositoryError> {
        let tables = self.tables.lock().expect("inventory mutex poisoned");
        Ok(tables.beds.get(id).cloned())
    }

    fn rooms_in_hostel(&self, id: &HostelId) -> Result<Vec<Room>, RepositoryError> {
        let tables = self.tables.lock().expect("inventory mutex poisoned");
        let mut rooms: Vec<Room> = tables
            .rooms
            .values()
            .filter(|room| &room.hostel_id == id)
            .cloned()
            .collect();
        rooms.sort_by(|a, b| (a.floor, &a.number).cmp(&(b.floor, &b.number)));
        Ok(rooms)
    }

    fn beds_in_room(&self, id: &RoomId) -> Result<Vec<Bed>, RepositoryError> {
        let tables = self.tables.lock().expect("inventory mutex poisoned");
        Ok(sorted_beds(
            tables
                .beds
                .values()
                .filter(|bed| &bed.room_id == id)
                .cloned()
                .collect(),
        ))
    }

    fn all_beds(&self) -> Result<Vec<Bed>, RepositoryError> {
        let tables = self.tables.lock().expect("inventory mutex poisoned");
        Ok(sorted_beds(tables.beds.values().cloned().collect()))
    }

    fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Bed>, RepositoryError> {
        let tables = self.tables.lock().expect("inventory mutex poisoned");
        Ok(sorted_beds(
            tables
                .beds
                .values()
                .filter(|bed| bed.state.is_expired_hold(now))
                .cloned()
                .collect(),
        ))
    }

    fn compare_and_swap(
        &self,
        id: &BedId,
        guard: &BedGuard,
        next: BedState,
    ) -> Result<CasOutcome, RepositoryError> {
        let mut tables = self.tables.lock().expect("inventory mutex poisoned");
        let bed = tables.beds.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if !guard.admits(&bed.state) {
            return Ok(CasOutcome::Rejected {
                current: bed.clone(),
            });
        }
        let previous = std::mem::replace(&mut bed.state, next);
        bed.version += 1;
        Ok(CasOutcome::Applied {
            previous,
            bed: bed.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{BedStatus, GenderPolicy, OccupantRef, RoomStatus, RoomType};

    fn seeded() -> InMemoryInventoryRepository {
        let repository = InMemoryInventoryRepository::default();
        repository
            .insert_hostel(Hostel {
                id: HostelId("h-1".into()),
                name: "North Block".into(),
                campus: "Main".into(),
                capacity: 10,
                amenities: Vec::new(),
                active: true,
            })
            .expect("hostel");
        repository
            .insert_room(Room {
                id: RoomId("r-1".into()),
                hostel_id: HostelId("h-1".into()),
                number: "101".into(),
                room_type: RoomType::Double,
                gender_policy: GenderPolicy::Any,
                status: RoomStatus::Open,
                floor: 1,
            })
            .expect("room");
        repository
            .insert_bed(Bed::new(BedId("b-1".into()), RoomId("r-1".into()), "A"))
            .expect("bed");
        repository
    }

    #[test]
    fn rejects_duplicate_room_numbers_and_bed_numbers() {
        let repository = seeded();
        let duplicate_room = Room {
            id: RoomId("r-2".into()),
            hostel_id: HostelId("h-1".into()),
            number: "101".into(),
            room_type: RoomType::Single,
            gender_policy: GenderPolicy::Any,
            status: RoomStatus::Open,
            floor: 1,
        };
        assert_eq!(
            repository.insert_room(duplicate_room),
            Err(RepositoryError::Conflict)
        );
        assert_eq!(
            repository.insert_bed(Bed::new(BedId("b-2".into()), RoomId("r-1".into()), "A")),
            Err(RepositoryError::Conflict)
        );
    }

    #[test]
    fn compare_and_swap_bumps_version_only_when_guard_holds() {
        let repository = seeded();
        let id = BedId("b-1".into());
        let occupant = OccupantRef("booking:x".into());

        let applied = repository
            .compare_and_swap(
                &id,
                &BedGuard::Status(BedStatus::Available),
                BedState::Allocated {
                    occupant: occupant.clone(),
                },
            )
            .expect("cas");
        match applied {
            CasOutcome::Applied { previous, bed } => {
                assert_eq!(previous, BedState::Available);
                assert_eq!(bed.version, 1);
            }
            other => panic!("expected applied, got {other:?}"),
        }

        let rejected = repository
            .compare_and_swap(&id, &BedGuard::Status(BedStatus::Available), BedState::Blocked)
            .expect("cas");
        match rejected {
            CasOutcome::Rejected { current } => {
                assert_eq!(current.status(), BedStatus::Allocated);
                assert_eq!(current.version, 1);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn compare_and_swap_reports_missing_beds() {
        let repository = seeded();
        assert_eq!(
            repository.compare_and_swap(&BedId("nope".into()), &BedGuard::Any, BedState::Blocked),
            Err(RepositoryError::NotFound)
        );
    }
}
