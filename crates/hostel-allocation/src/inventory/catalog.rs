use std::sync::Arc;

use tracing::info;

use super::domain::{Bed, BedId, Hostel, HostelId, Room, RoomId};
use super::repository::InventoryRepository;
use crate::error::ServiceError;
use crate::storage::RepositoryError;

/// Registers the physical hierarchy. Nothing here touches bed occupancy.
pub struct InventoryCatalog {
    repository: Arc<dyn InventoryRepository>,
}

impl InventoryCatalog {
    pub fn new(repository: Arc<dyn InventoryRepository>) -> Self {
        Self { repository }
    }

    pub fn add_hostel(&self, hostel: Hostel) -> Result<Hostel, ServiceError> {
        let id = hostel.id.clone();
        let stored = self.repository.insert_hostel(hostel).map_err(|err| match err {
            RepositoryError::Conflict => ServiceError::conflict(format!("hostel {id} already exists")),
            other => other.into(),
        })?;
        info!(hostel_id = %stored.id, name = %stored.name, "hostel registered");
        Ok(stored)
    }

    pub fn add_room(&self, room: Room) -> Result<Room, ServiceError> {
        let label = format!("{}/{}", room.hostel_id, room.number);
        let hostel_id = room.hostel_id.clone();
        self.repository.insert_room(room).map_err(|err| match err {
            RepositoryError::Conflict => {
                ServiceError::conflict(format!("room {label} already exists"))
            }
            RepositoryError::NotFound => ServiceError::not_found("hostel", hostel_id),
            other => other.into(),
        })
    }

    /// Adds a bed, refusing to exceed the hostel's declared capacity.
    pub fn add_bed(&self, room_id: &RoomId, bed_no: &str) -> Result<Bed, ServiceError> {
        let room = self
            .repository
            .room(room_id)?
            .ok_or_else(|| ServiceError::not_found("room", room_id))?;
        let hostel = self
            .repository
            .hostel(&room.hostel_id)?
            .ok_or_else(|| ServiceError::not_found("hostel", &room.hostel_id))?;

        let beds_in_hostel = self.beds_in_hostel(&hostel.id)?;
        if beds_in_hostel >= hostel.capacity as usize {
            return Err(ServiceError::validation(format!(
                "hostel {} is at its capacity of {} beds",
                hostel.name, hostel.capacity
            )));
        }

        let bed = Bed::new(BedId(format!("{}-{}", room_id, bed_no)), room_id.clone(), bed_no);
        self.repository.insert_bed(bed).map_err(|err| match err {
            RepositoryError::Conflict => {
                ServiceError::conflict(format!("bed {bed_no} already exists in room {room_id}"))
            }
            other => other.into(),
        })
    }

    pub fn rooms(&self, hostel_id: &HostelId) -> Result<Vec<Room>, ServiceError> {
        Ok(self.repository.rooms_in_hostel(hostel_id)?)
    }

    fn beds_in_hostel(&self, hostel_id: &HostelId) -> Result<usize, ServiceError> {
        let mut total = 0;
        for room in self.repository.rooms_in_hostel(hostel_id)? {
            total += self.repository.beds_in_room(&room.id)?.len();
        }
        Ok(total)
    }
}
