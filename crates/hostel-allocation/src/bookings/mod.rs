//! Dated bed bookings and the overlap validator that keeps them exclusive.

pub mod domain;
mod overlap;
pub mod repository;
pub mod router;
mod service;

pub use domain::{Booking, BookingId, BookingPatch, BookingStatus, NewBooking};
pub use overlap::{ranges_overlap, OverlapValidator};
pub use repository::BookingRepository;
pub use router::booking_router;
pub use service::BookingService;
