use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::rules::StudentId;
use crate::inventory::BedId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingId(pub String);

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Hold,
    PendingPayment,
    Confirmed,
    Cancelled,
    CheckedIn,
    CheckedOut,
}

impl BookingStatus {
    pub const fn label(self) -> &'static str {
        match self {
            BookingStatus::Hold => "HOLD",
            BookingStatus::PendingPayment => "PENDING_PAYMENT",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::CheckedIn => "CHECKED_IN",
            BookingStatus::CheckedOut => "CHECKED_OUT",
        }
    }

    /// Only these block other bookings of the same bed.
    pub const fn is_active(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::CheckedIn)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::CheckedOut)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Hold, PendingPayment)
                | (PendingPayment, Confirmed)
                | (Confirmed, CheckedIn)
                | (CheckedIn, CheckedOut)
                | (Hold | PendingPayment | Confirmed, Cancelled)
        )
    }
}

/// A dated stay on one bed. Dates form the half-open range `[check_in, check_out)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub student_id: StudentId,
    pub bed_id: BedId,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    #[serde(alias = "studentId")]
    pub student_id: StudentId,
    #[serde(alias = "bedId")]
    pub bed_id: BedId,
    #[serde(alias = "checkIn", alias = "checkInDate")]
    pub check_in: NaiveDate,
    #[serde(alias = "checkOut", alias = "checkOutDate")]
    pub check_out: NaiveDate,
    #[serde(default, alias = "holdTtlSeconds")]
    pub hold_ttl_seconds: Option<u64>,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingPatch {
    #[serde(default, alias = "checkIn", alias = "checkInDate")]
    pub check_in: Option<NaiveDate>,
    #[serde(default, alias = "checkOut", alias = "checkOutDate")]
    pub check_out: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<BookingStatus>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self.check_in.is_none() && self.check_out.is_none() && self.status.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_follows_the_payment_path() {
        use BookingStatus::*;
        assert!(Hold.can_transition_to(PendingPayment));
        assert!(PendingPayment.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(CheckedIn));
        assert!(CheckedIn.can_transition_to(CheckedOut));

        assert!(!Hold.can_transition_to(CheckedIn));
        assert!(!CheckedIn.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Hold));
        assert!(Confirmed.can_transition_to(Cancelled));
    }

    #[test]
    fn only_confirmed_and_checked_in_are_active() {
        let active: Vec<_> = [
            BookingStatus::Hold,
            BookingStatus::PendingPayment,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
            BookingStatus::CheckedIn,
            BookingStatus::CheckedOut,
        ]
        .into_iter()
        .filter(|status| status.is_active())
        .collect();
        assert_eq!(active, vec![BookingStatus::Confirmed, BookingStatus::CheckedIn]);
    }

    #[test]
    fn patch_accepts_camel_case_payloads() {
        let patch: BookingPatch = serde_json::from_str(
            r#"{"checkInDate": "2024-02-01", "status": "PENDING_PAYMENT"}"#,
        )
        .expect("deserializes");
        assert_eq!(patch.check_in, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(patch.status, Some(BookingStatus::PendingPayment));
        assert!(patch.check_out.is_none());
    }
}
