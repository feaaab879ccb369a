//! Pure request transitions.
//!
//! Each function takes the current request and returns the next value together
//! with the events the change announces. Nothing here touches storage; the
//! service persists the result with a version check.

use chrono::{DateTime, Utc};

use super::domain::{
    AllocationRequest, BedAssignment, Document, RequestStatus, TimelineAction, TimelineEntry,
    WaitlistEntry,
};
use crate::error::ServiceError;
use crate::events::DomainEvent;
use crate::inventory::BedPlacement;

#[derive(Debug, Clone)]
pub struct Transition {
    pub request: AllocationRequest,
    pub events: Vec<DomainEvent>,
}

impl Transition {
    fn quiet(request: AllocationRequest) -> Self {
        Self {
            request,
            events: Vec::new(),
        }
    }
}

fn record(
    request: &AllocationRequest,
    status: RequestStatus,
    action: TimelineAction,
    actor: &str,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> AllocationRequest {
    let mut next = request.clone();
    next.status = status;
    next.updated_at = now;
    next.timeline.push(TimelineEntry {
        action,
        status,
        actor: actor.to_string(),
        timestamp: now,
        comment,
    });
    next
}

fn require(
    request: &AllocationRequest,
    allowed: &[RequestStatus],
    action: &str,
) -> Result<(), ServiceError> {
    if allowed.contains(&request.status) {
        return Ok(());
    }
    Err(ServiceError::validation(format!(
        "cannot {action} request {} in status {}",
        request.id,
        request.status.label()
    )))
}

pub fn approve(
    request: &AllocationRequest,
    actor: &str,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    require(request, &[RequestStatus::Pending], "approve")?;
    let next = record(
        request,
        RequestStatus::Approved,
        TimelineAction::Approved,
        actor,
        comment,
        now,
    );
    Ok(Transition {
        events: vec![DomainEvent::AllocationRequestApproved {
            request_id: request.id.clone(),
            actor: actor.to_string(),
        }],
        request: next,
    })
}

pub fn reject(
    request: &AllocationRequest,
    actor: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    require(
        request,
        &[RequestStatus::Pending, RequestStatus::Approved],
        "reject",
    )?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ServiceError::validation("a rejection reason is required"));
    }
    let next = record(
        request,
        RequestStatus::Rejected,
        TimelineAction::Rejected,
        actor,
        Some(reason.to_string()),
        now,
    );
    Ok(Transition {
        events: vec![DomainEvent::AllocationRequestRejected {
            request_id: request.id.clone(),
            reason: reason.to_string(),
        }],
        request: next,
    })
}

/// The caller picks `position` while holding the rule's waitlist lock.
pub fn waitlist(
    request: &AllocationRequest,
    actor: &str,
    position: u32,
    days_per_position: u32,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    require(
        request,
        &[RequestStatus::Pending, RequestStatus::Approved],
        "waitlist",
    )?;
    let mut next = record(
        request,
        RequestStatus::Waitlisted,
        TimelineAction::Waitlisted,
        actor,
        Some(format!("position {position}")),
        now,
    );
    next.waitlist = Some(WaitlistEntry {
        position,
        added_at: now,
        estimated_wait_days: position.saturating_mul(days_per_position),
    });
    Ok(Transition {
        events: vec![DomainEvent::AllocationRequestWaitlisted {
            request_id: request.id.clone(),
            rule_id: request.rule_id.clone(),
            position,
        }],
        request: next,
    })
}

/// Moves a waitlisted request to a new position after someone ahead left.
pub fn reposition(
    request: &AllocationRequest,
    position: u32,
    days_per_position: u32,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    require(request, &[RequestStatus::Waitlisted], "reposition")?;
    let Some(entry) = request.waitlist.as_ref() else {
        return Err(ServiceError::validation(format!(
            "request {} has no waitlist entry",
            request.id
        )));
    };
    if entry.position == position {
        return Ok(Transition::quiet(request.clone()));
    }
    let mut next = record(
        request,
        RequestStatus::Waitlisted,
        TimelineAction::WaitlistMoved,
        "system",
        Some(format!("position {} -> {position}", entry.position)),
        now,
    );
    next.waitlist = Some(WaitlistEntry {
        position,
        added_at: entry.added_at,
        estimated_wait_days: position.saturating_mul(days_per_position),
    });
    Ok(Transition::quiet(next))
}

/// Returns a waitlisted request to APPROVED so the next processor run picks it up.
pub fn promote(
    request: &AllocationRequest,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    require(request, &[RequestStatus::Waitlisted], "promote")?;
    let mut next = record(
        request,
        RequestStatus::Approved,
        TimelineAction::Promoted,
        actor,
        Some("promoted from waitlist".to_string()),
        now,
    );
    next.waitlist = None;
    Ok(Transition {
        events: vec![DomainEvent::AllocationRequestApproved {
            request_id: request.id.clone(),
            actor: actor.to_string(),
        }],
        request: next,
    })
}

pub fn ensure_allocatable(request: &AllocationRequest) -> Result<(), ServiceError> {
    if request.is_eligible_for_allocation() {
        return Ok(());
    }
    Err(ServiceError::validation(format!(
        "request {} is not eligible for allocation (status {}, {} unverified document(s))",
        request.id,
        request.status.label(),
        request
            .documents
            .iter()
            .filter(|document| !document.verified)
            .count()
    )))
}

pub fn allocate(
    request: &AllocationRequest,
    actor: &str,
    placement: &BedPlacement,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    ensure_allocatable(request)?;
    let mut next = record(
        request,
        RequestStatus::Allocated,
        TimelineAction::Allocated,
        actor,
        Some(format!(
            "{} room {} bed {}",
            placement.hostel.name, placement.room.number, placement.bed.bed_no
        )),
        now,
    );
    next.allocation = Some(BedAssignment {
        hostel_id: placement.hostel.id.clone(),
        room_id: placement.room.id.clone(),
        bed_id: placement.bed.id.clone(),
        allocated_at: now,
        allocated_by: actor.to_string(),
    });
    next.waitlist = None;
    Ok(Transition {
        events: vec![DomainEvent::AllocationRequestAllocated {
            request_id: request.id.clone(),
            hostel_id: placement.hostel.id.clone(),
            room_id: placement.room.id.clone(),
            bed_id: placement.bed.id.clone(),
        }],
        request: next,
    })
}

pub fn cancel(
    request: &AllocationRequest,
    actor: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    require(
        request,
        &[
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Waitlisted,
        ],
        "cancel",
    )?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ServiceError::validation("a cancellation reason is required"));
    }
    let reason = reason.to_string();
    let mut next = record(
        request,
        RequestStatus::Cancelled,
        TimelineAction::Cancelled,
        actor,
        Some(reason.clone()),
        now,
    );
    next.waitlist = None;
    Ok(Transition {
        events: vec![DomainEvent::AllocationRequestCancelled {
            request_id: request.id.clone(),
            reason,
        }],
        request: next,
    })
}

fn require_open(request: &AllocationRequest) -> Result<(), ServiceError> {
    match request.status {
        RequestStatus::Rejected | RequestStatus::Cancelled => Err(ServiceError::validation(
            format!(
                "request {} is {} and accepts no documents",
                request.id,
                request.status.label()
            ),
        )),
        _ => Ok(()),
    }
}

pub fn add_document(
    request: &AllocationRequest,
    actor: &str,
    document: Document,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    require_open(request)?;
    if document.doc_type.trim().is_empty() || document.url.trim().is_empty() {
        return Err(ServiceError::validation("document type and url are required"));
    }
    let comment = Some(document.doc_type.clone());
    let mut next = record(
        request,
        request.status,
        TimelineAction::DocumentAdded,
        actor,
        comment,
        now,
    );
    next.documents.push(document);
    Ok(Transition::quiet(next))
}

pub fn verify_document(
    request: &AllocationRequest,
    actor: &str,
    index: usize,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    require_open(request)?;
    let Some(document) = request.documents.get(index) else {
        return Err(ServiceError::validation(format!(
            "document index {index} out of range ({} document(s))",
            request.documents.len()
        )));
    };
    let comment = Some(document.doc_type.clone());
    let mut next = record(
        request,
        request.status,
        TimelineAction::DocumentVerified,
        actor,
        comment,
        now,
    );
    next.documents[index].verified = true;
    Ok(Transition::quiet(next))
}
