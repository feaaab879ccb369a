use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::rules::{ApplicantProfile, RuleId, StudentId};
use crate::inventory::{BedId, HostelId, RoomId, RoomType};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Waitlisted,
    Allocated,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::Waitlisted,
        RequestStatus::Allocated,
        RequestStatus::Cancelled,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Waitlisted => "WAITLISTED",
            RequestStatus::Allocated => "ALLOCATED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Where the applicant would rather live. Preferences rank beds, they never
/// exclude them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, alias = "hostelIds")]
    pub hostel_ids: Vec<HostelId>,
    #[serde(default, alias = "roomTypes")]
    pub room_types: Vec<RoomType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedAssignment {
    pub hostel_id: HostelId,
    pub room_id: RoomId,
    pub bed_id: BedId,
    pub allocated_at: DateTime<Utc>,
    pub allocated_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub position: u32,
    pub added_at: DateTime<Utc>,
    pub estimated_wait_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "type", alias = "doc_type")]
    pub doc_type: String,
    pub url: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineAction {
    Created,
    Approved,
    Rejected,
    Waitlisted,
    WaitlistMoved,
    Promoted,
    Allocated,
    Cancelled,
    DocumentAdded,
    DocumentVerified,
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub action: TimelineAction,
    pub status: RequestStatus,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One applicant's request for a seat under one rule.
///
/// `allocation` is present only while ALLOCATED and `waitlist` only while
/// WAITLISTED. `sequence` is assigned by the store on insert and breaks ties
/// between requests created in the same instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub id: RequestId,
    pub student_id: StudentId,
    pub rule_id: RuleId,
    pub status: RequestStatus,
    pub priority_score: f64,
    pub profile: ApplicantProfile,
    pub preferences: Preferences,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<BedAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist: Option<WaitlistEntry>,
    pub documents: Vec<Document>,
    pub timeline: Vec<TimelineEntry>,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl AllocationRequest {
    /// Approved, every document verified, and no bed bound yet.
    pub fn is_eligible_for_allocation(&self) -> bool {
        self.status == RequestStatus::Approved
            && self.documents.iter().all(|document| document.verified)
            && self.allocation.is_none()
    }

    pub fn waitlist_position(&self) -> Option<u32> {
        self.waitlist.as_ref().map(|entry| entry.position)
    }
}

/// Input for opening a request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAllocationRequest {
    #[serde(alias = "ruleId", alias = "allocationRuleId")]
    pub rule_id: RuleId,
    pub profile: ApplicantProfile,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub documents: Vec<Document>,
}
