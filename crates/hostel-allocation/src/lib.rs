//! Reservation and allocation engine for hostel bed inventory.
//!
//! The crate is organised leaves-first: the in-memory [`storage`] backs the
//! [`inventory`] bed lifecycle, [`bookings`] guards date-range exclusivity, and
//! [`allocation`] layers the rule catalog, request workflow and batch processor
//! on top. State changes are fanned out through [`events`].

pub mod allocation;
pub mod bookings;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod inventory;
pub mod storage;
pub mod telemetry;
