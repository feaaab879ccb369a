//! Hostel → room → bed inventory and the bed lifecycle state machine.

mod catalog;
pub mod domain;
mod lifecycle;
pub mod repository;
pub mod router;
mod sweeper;


pub use catalog::InventoryCatalog;
pub use domain::{
    Bed, BedGuard, BedId, BedState, BedStatus, Gender, GenderPolicy, Hostel, HostelId,
    OccupantRef, Room, RoomId, RoomStatus, RoomType,
};
pub use lifecycle::{BedLifecycleManager, BedPlacement, HoldPolicy, SweepReport};
pub use repository::{CasOutcome, InventoryRepository};
pub use router::inventory_router;
pub use sweeper::spawn_hold_sweeper;
