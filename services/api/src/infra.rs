use chrono::{DateTime, Duration, NaiveDate, Utc};
use hostel_allocation::allocation::rules::{
    AllocationMethod, AllocationTarget, EligibilityCriteria, KycStatus, RuleDefinition,
    RuleSchedule, SeatQuotas, YearRange,
};
use hostel_allocation::engine::AllocationEngine;
use hostel_allocation::error::ServiceError;
use hostel_allocation::inventory::{
    GenderPolicy, Hostel, HostelId, Room, RoomId, RoomStatus, RoomType,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Counts of what [`seed_campus`] registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SeedSummary {
    pub(crate) hostels: usize,
    pub(crate) rooms: usize,
    pub(crate) beds: usize,
}

struct RoomSeed {
    id: &'static str,
    number: &'static str,
    room_type: RoomType,
    gender_policy: GenderPolicy,
    floor: i16,
    beds: &'static [&'static str],
}

struct HostelSeed {
    id: &'static str,
    name: &'static str,
    capacity: u32,
    amenities: &'static [&'static str],
    rooms: &'static [RoomSeed],
}

const CAMPUS: &[HostelSeed] = &[
    HostelSeed {
        id: "h-maple",
        name: "Maple House",
        capacity: 5,
        amenities: &["wifi", "laundry"],
        rooms: &[
            RoomSeed {
                id: "m-101",
                number: "101",
                room_type: RoomType::Double,
                gender_policy: GenderPolicy::Female,
                floor: 1,
                beds: &["A", "B"],
            },
            RoomSeed {
                id: "m-102",
                number: "102",
                room_type: RoomType::Triple,
                gender_policy: GenderPolicy::Female,
                floor: 1,
                beds: &["A", "B", "C"],
            },
        ],
    },
    HostelSeed {
        id: "h-cedar",
        name: "Cedar Hall",
        capacity: 5,
        amenities: &["wifi", "gym"],
        rooms: &[
            RoomSeed {
                id: "c-201",
                number: "201",
                room_type: RoomType::Single,
                gender_policy: GenderPolicy::Male,
                floor: 2,
                beds: &["A"],
            },
            RoomSeed {
                id: "c-202",
                number: "202",
                room_type: RoomType::Double,
                gender_policy: GenderPolicy::Male,
                floor: 2,
                beds: &["A", "B"],
            },
            RoomSeed {
                id: "c-203",
                number: "203",
                room_type: RoomType::Dorm,
                gender_policy: GenderPolicy::Any,
                floor: 2,
                beds: &["A", "B"],
            },
        ],
    },
];

/// Registers the sample campus: two hostels, five rooms, ten beds.
pub(crate) fn seed_campus(engine: &AllocationEngine) -> Result<SeedSummary, ServiceError> {
    let mut summary = SeedSummary::default();
    for hostel in CAMPUS {
        engine.catalog.add_hostel(Hostel {
            id: HostelId(hostel.id.to_string()),
            name: hostel.name.to_string(),
            campus: "Main".to_string(),
            capacity: hostel.capacity,
            amenities: hostel.amenities.iter().map(|a| a.to_string()).collect(),
            active: true,
        })?;
        summary.hostels += 1;

        for room in hostel.rooms {
            let room_id = RoomId(room.id.to_string());
            engine.catalog.add_room(Room {
                id: room_id.clone(),
                hostel_id: HostelId(hostel.id.to_string()),
                number: room.number.to_string(),
                room_type: room.room_type,
                gender_policy: room.gender_policy,
                status: RoomStatus::Open,
                floor: room.floor,
            })?;
            summary.rooms += 1;

            for bed_no in room.beds {
                engine.catalog.add_bed(&room_id, bed_no)?;
                summary.beds += 1;
            }
        }
    }
    Ok(summary)
}

/// A rule open for applications and allocation around `now`.
pub(crate) fn sample_rule(now: DateTime<Utc>, seats: u32, waitlist: u32) -> RuleDefinition {
    RuleDefinition {
        name: "Returning students".to_string(),
        priority: 10,
        active: true,
        criteria: EligibilityCriteria {
            year_range: Some(YearRange { min: 2, max: 4 }),
            kyc_statuses: vec![KycStatus::Verified],
            ..EligibilityCriteria::default()
        },
        target: AllocationTarget {
            hostel_ids: Vec::new(),
            room_types: Vec::new(),
            gender_policy: GenderPolicy::Any,
            allocation_method: AllocationMethod::Priority,
        },
        quotas: SeatQuotas {
            total_seats: seats,
            reserved_seats: 0,
            waitlist_capacity: waitlist,
        },
        schedule: RuleSchedule {
            start_date: now - Duration::days(7),
            application_deadline: now + Duration::days(7),
            end_date: now + Duration::days(300),
            allocation_start_date: now - Duration::days(1),
            allocation_end_date: now + Duration::days(14),
        },
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
