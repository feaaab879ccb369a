//! In-memory implementations of every repository seam.
//!
//! Each store guards its maps with a single mutex, which makes every trait
//! method (compare-and-swap and versioned updates included) atomic. A database
//! backed implementation would express the same guards as conditional updates.

mod allocation;
mod bookings;
mod inventory;

pub use allocation::{InMemoryRequestRepository, InMemoryRuleRepository};
pub use bookings::InMemoryBookingRepository;
pub use inventory::InMemoryInventoryRepository;

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists or was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
