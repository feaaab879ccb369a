use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::RepositoryError;
use crate::bookings::{Booking, BookingId, BookingRepository};
use crate::inventory::BedId;

#[derive(Default, Clone)]
pub struct InMemoryBookingRepository {
    bookings: Arc<Mutex<HashMap<BookingId, Booking>>>,
}

impl BookingRepository for InMemoryBookingRepository {
    fn insert(&self, booking: Booking) -> Result<Booking, RepositoryError> {
        let mut bookings = self.bookings.lock().expect("booking mutex poisoned");
        if bookings.contains_key(&booking.id) {
            return Err(RepositoryError::Conflict);
        }
        bookings.insert(booking.id.clone(), booking.clone());
        Ok(booking)
    }

    fn update(&self, mut booking: Booking) -> Result<Booking, RepositoryError> {
        let mut bookings = self.bookings.lock().expect("booking mutex poisoned");
        let stored = bookings
            .get_mut(&booking.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != booking.version {
            return Err(RepositoryError::Conflict);
        }
        booking.version += 1;
        *stored = booking.clone();
        Ok(booking)
    }

    fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let bookings = self.bookings.lock().expect("booking mutex poisoned");
        Ok(bookings.get(id).cloned())
    }

    fn for_bed(&self, bed_id: &BedId) -> Result<Vec<Booking>, RepositoryError> {
        let bookings = self.bookings.lock().expect("booking mutex poisoned");
        let mut matching: Vec<Booking> = bookings
            .values()
            .filter(|booking| &booking.bed_id == bed_id)
            .cloned()
            .collect();
        matching.sort_by_key(|booking| booking.check_in);
        Ok(matching)
    }
}
