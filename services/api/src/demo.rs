use crate::infra::{sample_rule, seed_campus};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use clap::Args;
use hostel_allocation::allocation::requests::{NewAllocationRequest, Preferences, RequestStatus};
use hostel_allocation::allocation::rules::{ApplicantProfile, KycStatus, StudentId};
use hostel_allocation::clock::ManualClock;
use hostel_allocation::config::AllocationConfig;
use hostel_allocation::engine::AllocationEngine;
use hostel_allocation::error::{AppError, ServiceError};
use hostel_allocation::events::{EventKind, InMemoryEventLog};
use hostel_allocation::inventory::{BedId, Gender, OccupantRef, RoomType};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Date the demo runs on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Number of synthetic applicants.
    #[arg(long, default_value_t = 8)]
    pub(crate) applicants: u32,
    /// Seats offered by the demo rule.
    #[arg(long, default_value_t = 4)]
    pub(crate) seats: u32,
    /// Waitlist capacity of the demo rule.
    #[arg(long, default_value_t = 2)]
    pub(crate) waitlist: u32,
}

const GIVEN_NAMES: &[&str] = &[
    "asha", "bilal", "chen", "divya", "emeka", "farah", "goran", "hana", "ivan", "jaya",
];

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        today,
        applicants,
        seats,
        waitlist,
    } = args;

    let today = today.unwrap_or_else(|| Utc::now().date_naive());
    let start = today
        .and_hms_opt(9, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let events = InMemoryEventLog::default();
    let engine = AllocationEngine::in_memory(
        Arc::new(events.clone()),
        clock.clone(),
        AllocationConfig::default(),
    );

    println!("Hostel allocation demo ({today})");
    let seeded = seed_campus(&engine)?;
    println!(
        "  campus: {} hostels, {} rooms, {} beds",
        seeded.hostels, seeded.rooms, seeded.beds
    );

    let rule = engine.rules.create_rule(sample_rule(start, seats, waitlist))?;
    println!(
        "  rule {} \"{}\": {} seats, waitlist of {}",
        rule.id, rule.name, rule.quotas.total_seats, rule.quotas.waitlist_capacity
    );

    println!("\nApplications");
    for n in 0..applicants {
        let name = GIVEN_NAMES[n as usize % GIVEN_NAMES.len()];
        let profile = ApplicantProfile {
            student_id: StudentId(format!("stu-{name}-{n}")),
            year: 2 + (n % 3) as u8,
            category: "GEN".to_string(),
            domicile_state: "KA".to_string(),
            program: "BTECH".to_string(),
            seniority_score: Some(50.0 + f64::from((n * 37) % 50)),
            kyc_status: if n % 5 == 4 {
                KycStatus::Pending
            } else {
                KycStatus::Verified
            },
            gender: Some(if n % 2 == 0 {
                Gender::Female
            } else {
                Gender::Male
            }),
        };
        let student = profile.student_id.clone();
        let preferences = Preferences {
            hostel_ids: Vec::new(),
            room_types: if n % 3 == 0 {
                vec![RoomType::Single]
            } else {
                Vec::new()
            },
        };
        match engine.requests.create(NewAllocationRequest {
            rule_id: rule.id.clone(),
            profile,
            preferences,
            documents: Vec::new(),
        }) {
            Ok(request) => {
                engine.requests.approve(&request.id, "demo-warden", None)?;
                println!(
                    "  {:<16} score {:>5.1}  approved as {}",
                    student.0, request.priority_score, request.id
                );
            }
            Err(ServiceError::Validation(reason)) => {
                println!("  {:<16} turned away: {reason}", student.0);
            }
            Err(err) => return Err(err.into()),
        }
        clock.advance(Duration::seconds(30));
    }

    let summary = engine.processor.process_rule(&rule.id)?;
    println!(
        "\nAllocation run: {} allocated, {} waitlisted, {} errors",
        summary.allocated, summary.waitlisted, summary.errors
    );
    for request in engine.requests.for_rule(&rule.id)? {
        let detail = match (&request.allocation, request.waitlist_position()) {
            (Some(assignment), _) => format!("bed {}", assignment.bed_id),
            (None, Some(position)) => format!("waitlist #{position}"),
            (None, None) => String::new(),
        };
        println!(
            "  {:<16} {:<10} {}",
            request.student_id.0,
            request.status.label(),
            detail
        );
    }

    if let Some(first) = engine
        .requests
        .for_rule(&rule.id)?
        .into_iter()
        .find(|request| request.status == RequestStatus::Waitlisted)
    {
        engine
            .requests
            .cancel(&first.id, &first.student_id.0, "accepted an off-campus lease")?;
        println!("\n  {} left the waitlist; positions compacted", first.student_id);
    }

    println!("\nHold expiry");
    let spare = engine
        .beds
        .open_placements()?
        .into_iter()
        .next()
        .map(|placement| placement.bed.id);
    match spare {
        Some(bed_id) => demonstrate_hold_expiry(&engine, &clock, &bed_id)?,
        None => println!("  no free bed left to hold"),
    }

    let stats = engine.requests.statistics()?;
    println!("\nRequests by status");
    for (status, count) in &stats.requests_by_status {
        println!("  {status:<11} {count}");
    }
    println!("Beds by status");
    for (status, count) in &stats.beds_by_status {
        println!("  {status:<11} {count}");
    }

    let mut tally: BTreeMap<&'static str, usize> = BTreeMap::new();
    for kind in events.kinds() {
        *tally.entry(kind.label()).or_default() += 1;
    }
    println!("Events published");
    for (kind, count) in tally {
        println!("  {kind:<28} {count}");
    }
    println!(
        "  ({} bed hold(s) expired)",
        events.count(EventKind::BedHoldExpired)
    );

    Ok(())
}

fn demonstrate_hold_expiry(
    engine: &AllocationEngine,
    clock: &ManualClock,
    bed_id: &BedId,
) -> Result<(), ServiceError> {
    let held = engine
        .beds
        .hold(bed_id, OccupantRef("booking:walk-in".to_string()), Some(60))?;
    println!(
        "  held {} until {}",
        held.id,
        held.state
            .hold_expires_at()
            .map(|at| at.to_rfc3339())
            .unwrap_or_default()
    );
    clock.advance(Duration::seconds(61));
    let report = engine.beds.sweep_expired_holds()?;
    let after = engine.beds.bed(bed_id)?;
    println!(
        "  61s later the sweep released {} hold(s); {} is {}",
        report.expired,
        after.id,
        after.status().label()
    );
    Ok(())
}
