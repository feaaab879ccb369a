use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inventory::{Gender, GenderPolicy, HostelId, RoomType};

/// Identifier wrapper for allocation rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentId(pub String);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KycStatus {
    Pending,
    Verified,
    Rejected,
}

/// What the engine knows about an applicant when matching rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    #[serde(alias = "studentId")]
    pub student_id: StudentId,
    pub year: u8,
    pub category: String,
    #[serde(alias = "domicileState")]
    pub domicile_state: String,
    pub program: String,
    #[serde(default, alias = "seniorityScore")]
    pub seniority_score: Option<f64>,
    #[serde(alias = "kycStatus")]
    pub kyc_status: KycStatus,
    #[serde(default)]
    pub gender: Option<Gender>,
}

/// Inclusive academic-year bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub min: u8,
    pub max: u8,
}

impl YearRange {
    pub fn contains(self, year: u8) -> bool {
        (self.min..=self.max).contains(&year)
    }
}

/// Inclusive seniority-score bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    pub fn contains(self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }
}

/// Applicant filters. An absent range or an empty list places no restriction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityCriteria {
    #[serde(default, alias = "yearRange")]
    pub year_range: Option<YearRange>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, alias = "domicileStates")]
    pub domicile_states: Vec<String>,
    #[serde(default)]
    pub programs: Vec<String>,
    #[serde(default, alias = "seniorityScoreRange")]
    pub seniority_score_range: Option<ScoreRange>,
    #[serde(default, alias = "kycStatuses")]
    pub kyc_statuses: Vec<KycStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationMethod {
    #[default]
    Priority,
    FirstComeFirstServed,
}

impl AllocationMethod {
    pub const fn label(self) -> &'static str {
        match self {
            AllocationMethod::Priority => "PRIORITY",
            AllocationMethod::FirstComeFirstServed => "FIRST_COME_FIRST_SERVED",
        }
    }
}

/// Which beds a rule hands out and how applicants are ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTarget {
    #[serde(default, alias = "hostelIds")]
    pub hostel_ids: Vec<HostelId>,
    #[serde(default, alias = "roomTypes")]
    pub room_types: Vec<RoomType>,
    #[serde(default = "any_gender", alias = "genderPolicy")]
    pub gender_policy: GenderPolicy,
    #[serde(default, alias = "allocationMethod")]
    pub allocation_method: AllocationMethod,
}

fn any_gender() -> GenderPolicy {
    GenderPolicy::Any
}

impl Default for AllocationTarget {
    fn default() -> Self {
        Self {
            hostel_ids: Vec::new(),
            room_types: Vec::new(),
            gender_policy: GenderPolicy::Any,
            allocation_method: AllocationMethod::Priority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatQuotas {
    #[serde(alias = "totalSeats")]
    pub total_seats: u32,
    #[serde(default, alias = "reservedSeats")]
    pub reserved_seats: u32,
    #[serde(default, alias = "waitlistCapacity")]
    pub waitlist_capacity: u32,
}

impl SeatQuotas {
    /// Seats open to applicants once the staff holdback is set aside.
    pub fn available_seats(self) -> u32 {
        self.total_seats.saturating_sub(self.reserved_seats)
    }
}

/// Application and allocation windows. All bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSchedule {
    #[serde(alias = "startDate")]
    pub start_date: DateTime<Utc>,
    #[serde(alias = "applicationDeadline")]
    pub application_deadline: DateTime<Utc>,
    #[serde(alias = "endDate")]
    pub end_date: DateTime<Utc>,
    #[serde(alias = "allocationStartDate")]
    pub allocation_start_date: DateTime<Utc>,
    #[serde(alias = "allocationEndDate")]
    pub allocation_end_date: DateTime<Utc>,
}

impl RuleSchedule {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }

    pub fn accepts_applications(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.application_deadline
    }

    pub fn in_allocation_window(&self, now: DateTime<Utc>) -> bool {
        self.allocation_start_date <= now && now <= self.allocation_end_date
    }
}

/// Staff-authored rule input for create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled")]
    pub active: bool,
    #[serde(default)]
    pub criteria: EligibilityCriteria,
    #[serde(default)]
    pub target: AllocationTarget,
    pub quotas: SeatQuotas,
    pub schedule: RuleSchedule,
}

fn enabled() -> bool {
    true
}

/// A versioned eligibility and priority rule. Rules are never deleted, only
/// deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRule {
    pub id: RuleId,
    pub name: String,
    pub priority: i32,
    pub active: bool,
    pub criteria: EligibilityCriteria,
    pub target: AllocationTarget,
    pub quotas: SeatQuotas,
    pub schedule: RuleSchedule,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AllocationRule {
    pub fn matches(&self, profile: &ApplicantProfile) -> bool {
        super::matching::unmet_criteria(&self.criteria, profile).is_empty()
    }

    pub fn can_apply(&self, now: DateTime<Utc>) -> bool {
        self.active && self.schedule.accepts_applications(now)
    }

    pub fn is_allocation_window(&self, now: DateTime<Utc>) -> bool {
        self.schedule.in_allocation_window(now)
    }

    pub fn available_seats(&self) -> u32 {
        self.quotas.available_seats()
    }
}
