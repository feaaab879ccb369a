//! Allocation requests and their lifecycle.

pub mod domain;
pub mod repository;
mod service;
pub mod transitions;

#[cfg(test)]
mod tests;

pub use domain::{
    AllocationRequest, BedAssignment, Document, NewAllocationRequest, Preferences, RequestId,
    RequestStatus, TimelineAction, TimelineEntry, WaitlistEntry,
};
pub use repository::RequestRepository;
pub use service::AllocationRequestService;
pub use transitions::Transition;
