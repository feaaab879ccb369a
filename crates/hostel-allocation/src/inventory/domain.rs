use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::requests::RequestId;
use crate::bookings::BookingId;

/// Identifier wrapper for hostels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostelId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BedId(pub String);

impl fmt::Display for HostelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for BedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to whoever holds or owns a bed: an allocation request or a booking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccupantRef(pub String);

const REQUEST_PREFIX: &str = "request:";
const BOOKING_PREFIX: &str = "booking:";

impl OccupantRef {
    pub fn for_request(id: &RequestId) -> Self {
        Self(format!("{REQUEST_PREFIX}{}", id.0))
    }

    pub fn for_booking(id: &BookingId) -> Self {
        Self(format!("{BOOKING_PREFIX}{}", id.0))
    }

    /// The allocation request behind this reference, if it names one.
    pub fn request_id(&self) -> Option<RequestId> {
        self.0
            .strip_prefix(REQUEST_PREFIX)
            .map(|id| RequestId(id.to_string()))
    }
}

impl fmt::Display for OccupantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostel {
    pub id: HostelId,
    pub name: String,
    pub campus: String,
    pub capacity: u32,
    pub amenities: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    Single,
    Double,
    Triple,
    Dorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenderPolicy {
    Male,
    Female,
    Any,
}

impl GenderPolicy {
    /// Whether an applicant of `gender` may be placed under this policy. An
    /// applicant without a declared gender only fits mixed (`Any`) rooms.
    pub fn admits(self, gender: Option<Gender>) -> bool {
        match self {
            GenderPolicy::Any => true,
            GenderPolicy::Male => gender == Some(Gender::Male),
            GenderPolicy::Female => gender == Some(Gender::Female),
        }
    }

    /// Two policies are compatible when either side is open to anyone or both agree.
    pub fn compatible_with(self, other: GenderPolicy) -> bool {
        self == GenderPolicy::Any || other == GenderPolicy::Any || self == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Open,
    Maintenance,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub hostel_id: HostelId,
    pub number: String,
    pub room_type: RoomType,
    pub gender_policy: GenderPolicy,
    pub status: RoomStatus,
    pub floor: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BedStatus {
    Available,
    OnHold,
    Allocated,
    Blocked,
}

impl BedStatus {
    pub const fn label(self) -> &'static str {
        match self {
            BedStatus::Available => "AVAILABLE",
            BedStatus::OnHold => "ON_HOLD",
            BedStatus::Allocated => "ALLOCATED",
            BedStatus::Blocked => "BLOCKED",
        }
    }
}

/// Occupancy state of a bed. The occupant and hold expiry only exist in the
/// variants where they are meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BedState {
    Available,
    OnHold {
        occupant: OccupantRef,
        hold_expires_at: DateTime<Utc>,
    },
    Allocated {
        occupant: OccupantRef,
    },
    Blocked,
}

impl BedState {
    pub fn status(&self) -> BedStatus {
        match self {
            BedState::Available => BedStatus::Available,
            BedState::OnHold { .. } => BedStatus::OnHold,
            BedState::Allocated { .. } => BedStatus::Allocated,
            BedState::Blocked => BedStatus::Blocked,
        }
    }

    pub fn occupant(&self) -> Option<&OccupantRef> {
        match self {
            BedState::OnHold { occupant, .. } | BedState::Allocated { occupant } => Some(occupant),
            BedState::Available | BedState::Blocked => None,
        }
    }

    pub fn hold_expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            BedState::OnHold {
                hold_expires_at, ..
            } => Some(*hold_expires_at),
            _ => None,
        }
    }

    /// A hold whose expiry lies strictly before `now`.
    pub fn is_expired_hold(&self, now: DateTime<Utc>) -> bool {
        self.hold_expires_at()
            .map(|expires_at| expires_at < now)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bed {
    pub id: BedId,
    pub room_id: RoomId,
    pub bed_no: String,
    #[serde(flatten)]
    pub state: BedState,
    pub version: u64,
}

impl Bed {
    pub fn new(id: BedId, room_id: RoomId, bed_no: impl Into<String>) -> Self {
        Self {
            id,
            room_id,
            bed_no: bed_no.into(),
            state: BedState::Available,
            version: 0,
        }
    }

    pub fn status(&self) -> BedStatus {
        self.state.status()
    }

    pub fn occupant(&self) -> Option<&OccupantRef> {
        self.state.occupant()
    }
}

/// Precondition a compare-and-swap evaluates against the stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BedGuard {
    /// Any state with the given status.
    Status(BedStatus),
    /// Exactly this state, occupant and expiry included.
    Exact(BedState),
    /// Free, or already held by this occupant.
    AllocatableBy(OccupantRef),
    /// Held or allocated by this occupant.
    OccupiedBy(OccupantRef),
    Any,
}

impl BedGuard {
    pub fn admits(&self, state: &BedState) -> bool {
        match self {
            BedGuard::Status(status) => state.status() == *status,
            BedGuard::Exact(expected) => state == expected,
            BedGuard::AllocatableBy(occupant) => match state {
                BedState::Available => true,
                BedState::OnHold { occupant: held, .. } => held == occupant,
                BedState::Allocated { .. } | BedState::Blocked => false,
            },
            BedGuard::OccupiedBy(occupant) => state.occupant() == Some(occupant),
            BedGuard::Any => true,
        }
    }
}
