use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::allocation::requests::{
    AllocationRequest, Document, NewAllocationRequest, Preferences, RequestId, RequestRepository,
};
use crate::allocation::rules::{
    AllocationMethod, AllocationRule, AllocationTarget, ApplicantProfile, EligibilityCriteria,
    KycStatus, RuleDefinition, RuleId, RuleSchedule, SeatQuotas, StudentId,
};
use crate::clock::ManualClock;
use crate::config::AllocationConfig;
use crate::engine::{AllocationEngine, EngineStores};
use crate::events::InMemoryEventLog;
use crate::inventory::{
    Gender, GenderPolicy, Hostel, HostelId, Room, RoomId, RoomStatus, RoomType,
};
use crate::storage::{InMemoryRequestRepository, RepositoryError};

pub(super) fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
}

pub(super) struct Campus {
    pub(super) engine: AllocationEngine,
    pub(super) clock: Arc<ManualClock>,
    pub(super) events: InMemoryEventLog,
}

/// Request store whose updates can be switched to fail, for compensation paths.
#[derive(Default, Clone)]
pub(super) struct FlakyRequestRepository {
    inner: InMemoryRequestRepository,
    failing: Arc<AtomicBool>,
}

impl FlakyRequestRepository {
    pub(super) fn fail_updates(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl RequestRepository for FlakyRequestRepository {
    fn insert(&self, request: AllocationRequest) -> Result<AllocationRequest, RepositoryError> {
        self.inner.insert(request)
    }

    fn update(&self, request: AllocationRequest) -> Result<AllocationRequest, RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("request store offline".to_string()));
        }
        self.inner.update(request)
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<AllocationRequest>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn for_rule(&self, rule_id: &RuleId) -> Result<Vec<AllocationRequest>, RepositoryError> {
        self.inner.for_rule(rule_id)
    }

    fn for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<AllocationRequest>, RepositoryError> {
        self.inner.for_student(student_id)
    }

    fn all(&self) -> Result<Vec<AllocationRequest>, RepositoryError> {
        self.inner.all()
    }
}

/// Request store that parks the first rule listing after `arm` at its gate
/// twice: once to announce it has arrived, once to wait for release.
#[derive(Clone)]
pub(super) struct GatedRequestRepository {
    inner: InMemoryRequestRepository,
    armed: Arc<AtomicBool>,
    gate: Arc<Barrier>,
}

impl Default for GatedRequestRepository {
    fn default() -> Self {
        Self {
            inner: InMemoryRequestRepository::default(),
            armed: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(Barrier::new(2)),
        }
    }
}

impl GatedRequestRepository {
    pub(super) fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub(super) fn gate(&self) -> &Barrier {
        &self.gate
    }
}

impl RequestRepository for GatedRequestRepository {
    fn insert(&self, request: AllocationRequest) -> Result<AllocationRequest, RepositoryError> {
        self.inner.insert(request)
    }

    fn update(&self, request: AllocationRequest) -> Result<AllocationRequest, RepositoryError> {
        self.inner.update(request)
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<AllocationRequest>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn for_rule(&self, rule_id: &RuleId) -> Result<Vec<AllocationRequest>, RepositoryError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.gate.wait();
            self.gate.wait();
        }
        self.inner.for_rule(rule_id)
    }

    fn for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<AllocationRequest>, RepositoryError> {
        self.inner.for_student(student_id)
    }

    fn all(&self) -> Result<Vec<AllocationRequest>, RepositoryError> {
        self.inner.all()
    }
}

/// One hostel with a mixed double room (beds A, B) and a single room (bed A).
/// The clock sits inside both the application and the allocation window.
pub(super) fn campus() -> Campus {
    campus_with(EngineStores::in_memory())
}

pub(super) fn campus_with(stores: EngineStores) -> Campus {
    let clock = Arc::new(ManualClock::new(at(5, 10)));
    let events = InMemoryEventLog::default();
    let engine = AllocationEngine::new(
        stores,
        Arc::new(events.clone()),
        clock.clone(),
        AllocationConfig::default(),
    );

    engine
        .catalog
        .add_hostel(Hostel {
            id: HostelId("h-east".into()),
            name: "East Wing".into(),
            campus: "Main".into(),
            capacity: 3,
            amenities: vec!["wifi".into()],
            active: true,
        })
        .expect("hostel");
    for (id, number, room_type) in [
        ("r-201", "201", RoomType::Double),
        ("r-202", "202", RoomType::Single),
    ] {
        engine
            .catalog
            .add_room(Room {
                id: RoomId(id.into()),
                hostel_id: HostelId("h-east".into()),
                number: number.into(),
                room_type,
                gender_policy: GenderPolicy::Any,
                status: RoomStatus::Open,
                floor: 2,
            })
            .expect("room");
    }
    for bed_no in ["A", "B"] {
        engine
            .catalog
            .add_bed(&RoomId("r-201".into()), bed_no)
            .expect("bed");
    }
    engine
        .catalog
        .add_bed(&RoomId("r-202".into()), "A")
        .expect("bed");

    Campus {
        engine,
        clock,
        events,
    }
}

pub(super) fn schedule() -> RuleSchedule {
    RuleSchedule {
        start_date: at(1, 0),
        application_deadline: at(15, 0),
        end_date: Utc.with_ymd_and_hms(2025, 5, 31, 0, 0, 0).unwrap(),
        allocation_start_date: at(1, 0),
        allocation_end_date: at(30, 0),
    }
}

pub(super) fn definition(
    total_seats: u32,
    waitlist_capacity: u32,
    method: AllocationMethod,
) -> RuleDefinition {
    RuleDefinition {
        name: "Second years".into(),
        priority: 10,
        active: true,
        criteria: EligibilityCriteria {
            categories: vec!["GEN".into(), "OBC".into()],
            ..EligibilityCriteria::default()
        },
        target: AllocationTarget {
            hostel_ids: vec![HostelId("h-east".into())],
            allocation_method: method,
            ..AllocationTarget::default()
        },
        quotas: SeatQuotas {
            total_seats,
            reserved_seats: 0,
            waitlist_capacity,
        },
        schedule: schedule(),
    }
}

pub(super) fn rule(campus: &Campus, total_seats: u32, waitlist_capacity: u32) -> AllocationRule {
    campus
        .engine
        .rules
        .create_rule(definition(total_seats, waitlist_capacity, AllocationMethod::Priority))
        .expect("rule is valid")
}

pub(super) fn profile(student: &str, score: f64) -> ApplicantProfile {
    ApplicantProfile {
        student_id: StudentId(student.to_string()),
        year: 2,
        category: "OBC".into(),
        domicile_state: "KA".into(),
        program: "BTECH".into(),
        seniority_score: Some(score),
        kyc_status: KycStatus::Verified,
        gender: Some(Gender::Female),
    }
}

pub(super) fn application(rule_id: &RuleId, student: &str, score: f64) -> NewAllocationRequest {
    NewAllocationRequest {
        rule_id: rule_id.clone(),
        profile: profile(student, score),
        preferences: Preferences::default(),
        documents: Vec::new(),
    }
}

pub(super) fn id_card() -> Document {
    Document {
        doc_type: "ID_CARD".into(),
        url: "https://files.example/id.pdf".into(),
        verified: false,
    }
}

/// Creates and approves a request.
pub(super) fn approved(campus: &Campus, rule_id: &RuleId, student: &str, score: f64) -> RequestId {
    let request = campus
        .engine
        .requests
        .create(application(rule_id, student, score))
        .expect("request created");
    campus
        .engine
        .requests
        .approve(&request.id, "warden", None)
        .expect("request approved");
    request.id
}

pub(super) fn tick(campus: &Campus) {
    campus.clock.advance(Duration::seconds(1));
}

pub(super) fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub(super) async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body collects");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}
