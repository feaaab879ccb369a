use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::domain::{
    AllocationRequest, Document, NewAllocationRequest, RequestId, RequestStatus, TimelineAction,
    TimelineEntry,
};
use super::repository::RequestRepository;
use super::transitions::{self, Transition};
use crate::allocation::locks::KeyedLocks;
use crate::allocation::placement::{fits, rank_candidates};
use crate::allocation::rules::{unmet_criteria, AllocationRule, RuleCatalog, RuleId, StudentId};
use crate::allocation::statistics::{summarize, AllocationStatistics};
use crate::bookings::OverlapValidator;
use crate::clock::Clock;
use crate::error::ServiceError;
use crate::events::{publish_all, DomainEvent, EventPublisher};
use crate::inventory::{BedId, BedLifecycleManager, BedPlacement, BedStatus, OccupantRef};
use crate::storage::RepositoryError;

/// Drives allocation requests through their lifecycle.
///
/// Waitlist positions for a rule are only assigned or rewritten while holding
/// that rule's waitlist lock, so positions stay unique and gapless. Seats are
/// counted and taken under the rule's seat lock, so no caller can allocate
/// past the rule's quota.
pub struct AllocationRequestService {
    requests: Arc<dyn RequestRepository>,
    rules: Arc<RuleCatalog>,
    beds: Arc<BedLifecycleManager>,
    bookings: OverlapValidator,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    waitlist_locks: KeyedLocks<RuleId>,
    seat_locks: KeyedLocks<RuleId>,
    days_per_position: u32,
    sequence: AtomicU64,
}

impl AllocationRequestService {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        rules: Arc<RuleCatalog>,
        beds: Arc<BedLifecycleManager>,
        bookings: OverlapValidator,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        days_per_position: u32,
    ) -> Self {
        Self {
            requests,
            rules,
            beds,
            bookings,
            events,
            clock,
            waitlist_locks: KeyedLocks::new(),
            seat_locks: KeyedLocks::new(),
            days_per_position,
            sequence: AtomicU64::new(1),
        }
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        RequestId(format!("req-{id:06}"))
    }

    pub fn create(&self, input: NewAllocationRequest) -> Result<AllocationRequest, ServiceError> {
        let rule = self.rules.get_rule(&input.rule_id)?;
        let now = self.clock.now();
        if !rule.can_apply(now) {
            return Err(ServiceError::validation(format!(
                "allocation rule {} is not accepting applications",
                rule.id
            )));
        }
        let unmet = unmet_criteria(&rule.criteria, &input.profile);
        if !unmet.is_empty() {
            let labels: Vec<&str> = unmet.iter().map(|criterion| criterion.label()).collect();
            return Err(ServiceError::validation(format!(
                "applicant does not meet rule {} on: {}",
                rule.id,
                labels.join(", ")
            )));
        }

        let student_id = input.profile.student_id.clone();
        let request = AllocationRequest {
            id: self.next_request_id(),
            student_id: student_id.clone(),
            rule_id: rule.id.clone(),
            status: RequestStatus::Pending,
            priority_score: input.profile.seniority_score.unwrap_or(0.0),
            profile: input.profile,
            preferences: input.preferences,
            allocation: None,
            waitlist: None,
            documents: input
                .documents
                .into_iter()
                .map(|document| Document {
                    verified: false,
                    ..document
                })
                .collect(),
            timeline: vec![TimelineEntry {
                action: TimelineAction::Created,
                status: RequestStatus::Pending,
                actor: student_id.0.clone(),
                timestamp: now,
                comment: None,
            }],
            sequence: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let stored = self.requests.insert(request).map_err(|err| match err {
            RepositoryError::Conflict => ServiceError::conflict(format!(
                "student {student_id} already has a request under rule {}",
                rule.id
            )),
            other => other.into(),
        })?;

        info!(
            request_id = %stored.id,
            student_id = %stored.student_id,
            rule_id = %stored.rule_id,
            priority = stored.priority_score,
            "allocation request created"
        );
        self.emit(
            vec![DomainEvent::AllocationRequestCreated {
                request_id: stored.id.clone(),
                student_id: stored.student_id.clone(),
                rule_id: stored.rule_id.clone(),
            }],
            &stored.id,
        );
        Ok(stored)
    }

    pub fn get(&self, id: &RequestId) -> Result<AllocationRequest, ServiceError> {
        self.requests
            .fetch(id)?
            .ok_or_else(|| ServiceError::not_found("allocation request", id))
    }

    pub fn for_rule(&self, rule_id: &RuleId) -> Result<Vec<AllocationRequest>, ServiceError> {
        Ok(self.requests.for_rule(rule_id)?)
    }

    pub fn for_student(&self, student_id: &StudentId) -> Result<Vec<AllocationRequest>, ServiceError> {
        Ok(self.requests.for_student(student_id)?)
    }

    pub fn approve(
        &self,
        id: &RequestId,
        actor: &str,
        comment: Option<String>,
    ) -> Result<AllocationRequest, ServiceError> {
        let current = self.get(id)?;
        let stored = self.apply(transitions::approve(&current, actor, comment, self.clock.now())?)?;
        info!(request_id = %id, actor, "allocation request approved");
        Ok(stored)
    }

    pub fn reject(
        &self,
        id: &RequestId,
        actor: &str,
        reason: &str,
    ) -> Result<AllocationRequest, ServiceError> {
        let current = self.get(id)?;
        let stored = self.apply(transitions::reject(&current, actor, reason, self.clock.now())?)?;
        info!(request_id = %id, actor, reason, "allocation request rejected");
        Ok(stored)
    }

    /// Appends the request to its rule's waitlist.
    pub fn waitlist(&self, id: &RequestId, actor: &str) -> Result<AllocationRequest, ServiceError> {
        let rule_id = self.get(id)?.rule_id;
        let rule = self.rules.get_rule(&rule_id)?;

        self.waitlist_locks.with_lock(&rule_id, || {
            let current = self.get(id)?;
            let waitlisted = self
                .requests
                .for_rule(&rule_id)?
                .iter()
                .filter(|request| request.status == RequestStatus::Waitlisted)
                .count() as u32;
            if waitlisted >= rule.quotas.waitlist_capacity {
                return Err(ServiceError::validation(format!(
                    "waitlist for rule {rule_id} is full ({waitlisted} of {})",
                    rule.quotas.waitlist_capacity
                )));
            }

            let position = waitlisted + 1;
            let stored = self.apply(transitions::waitlist(
                &current,
                actor,
                position,
                self.days_per_position,
                self.clock.now(),
            )?)?;
            info!(request_id = %id, rule_id = %rule_id, position, "allocation request waitlisted");
            Ok(stored)
        })
    }

    /// Binds a bed to an approved request. Without an explicit bed the best
    /// matching free bed is chosen.
    pub fn allocate(
        &self,
        id: &RequestId,
        actor: &str,
        bed_id: Option<&BedId>,
    ) -> Result<AllocationRequest, ServiceError> {
        let request = self.get(id)?;
        transitions::ensure_allocatable(&request)?;
        let rule = self.rules.get_rule(&request.rule_id)?;

        let candidates = match bed_id {
            Some(bed_id) => {
                let placement = self.beds.locate(bed_id)?;
                if !fits(&placement, &rule, &request) {
                    return Err(ServiceError::validation(format!(
                        "bed {bed_id} is outside the target of rule {}",
                        rule.id
                    )));
                }
                vec![placement]
            }
            None => rank_candidates(&self.beds.open_placements()?, &rule, &request),
        };
        self.allocate_into(&request, &rule, &candidates, actor)
    }

    /// Tries `candidates` in order until one bed allocation succeeds, then
    /// records it on the request. A failed save releases the bed again.
    /// Refused once the rule's ALLOCATED requests fill its available seats.
    pub(crate) fn allocate_into(
        &self,
        request: &AllocationRequest,
        rule: &AllocationRule,
        candidates: &[BedPlacement],
        actor: &str,
    ) -> Result<AllocationRequest, ServiceError> {
        self.seat_locks.with_lock(&rule.id, || {
            self.allocate_seat(&request.id, rule, candidates, actor)
        })
    }

    fn allocate_seat(
        &self,
        id: &RequestId,
        rule: &AllocationRule,
        candidates: &[BedPlacement],
        actor: &str,
    ) -> Result<AllocationRequest, ServiceError> {
        let request = self.get(id)?;
        transitions::ensure_allocatable(&request)?;
        let seated = self
            .requests
            .for_rule(&rule.id)?
            .iter()
            .filter(|other| other.status == RequestStatus::Allocated)
            .count() as u32;
        if seated >= rule.available_seats() {
            return Err(ServiceError::validation(format!(
                "rule {} has no seats left ({seated} of {} allocated)",
                rule.id,
                rule.available_seats()
            )));
        }

        let occupant = OccupantRef::for_request(&request.id);
        let now = self.clock.now();
        let (stay_start, stay_end) = stay_window(rule, now);

        let mut chosen = None;
        for placement in candidates {
            let bed_id = &placement.bed.id;
            let claimed = self.bookings.with_bed_lock(bed_id, || -> Result<bool, ServiceError> {
                if self
                    .bookings
                    .has_conflict(bed_id, stay_start, stay_end, None)?
                {
                    debug!(bed_id = %bed_id, "bed has an overlapping booking, skipped");
                    return Ok(false);
                }
                match self.beds.allocate(bed_id, occupant.clone()) {
                    Ok(_) => Ok(true),
                    Err(ServiceError::Conflict(reason)) | Err(ServiceError::Validation(reason)) => {
                        debug!(bed_id = %bed_id, reason = %reason, "bed no longer allocatable");
                        Ok(false)
                    }
                    Err(err) => Err(err),
                }
            })?;
            if claimed {
                chosen = Some(placement);
                break;
            }
        }
        let Some(placement) = chosen else {
            return Err(ServiceError::conflict(format!(
                "no matching bed available for request {}",
                request.id
            )));
        };

        let transition = transitions::allocate(&request, actor, placement, now)?;
        let stored = match self.save(transition.request) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(
                    request_id = %request.id,
                    bed_id = %placement.bed.id,
                    error = %err,
                    "request save failed after bed allocation, releasing bed"
                );
                if let Err(release_err) = self.beds.release_occupant(&placement.bed.id, &occupant) {
                    warn!(
                        bed_id = %placement.bed.id,
                        error = %release_err,
                        "compensating release failed"
                    );
                }
                return Err(err);
            }
        };

        info!(
            request_id = %stored.id,
            bed_id = %placement.bed.id,
            hostel = %placement.hostel.name,
            room = %placement.room.number,
            actor,
            "bed allocated to request"
        );
        self.emit(transition.events, &stored.id);
        Ok(stored)
    }

    pub fn cancel(
        &self,
        id: &RequestId,
        actor: &str,
        reason: &str,
    ) -> Result<AllocationRequest, ServiceError> {
        let current = self.get(id)?;
        if current.status != RequestStatus::Waitlisted {
            let stored = self.apply(transitions::cancel(&current, actor, reason, self.clock.now())?)?;
            info!(request_id = %id, actor, "allocation request cancelled");
            return Ok(stored);
        }

        let rule_id = current.rule_id.clone();
        self.waitlist_locks.with_lock(&rule_id, || {
            let current = self.get(id)?;
            let stored =
                self.apply(transitions::cancel(&current, actor, reason, self.clock.now())?)?;
            self.compact_locked(&rule_id)?;
            info!(request_id = %id, actor, "waitlisted request cancelled");
            Ok(stored)
        })
    }

    pub fn add_document(
        &self,
        id: &RequestId,
        actor: &str,
        document: Document,
    ) -> Result<AllocationRequest, ServiceError> {
        let current = self.get(id)?;
        self.apply(transitions::add_document(
            &current,
            actor,
            document,
            self.clock.now(),
        )?)
    }

    pub fn verify_document(
        &self,
        id: &RequestId,
        actor: &str,
        index: usize,
    ) -> Result<AllocationRequest, ServiceError> {
        let current = self.get(id)?;
        self.apply(transitions::verify_document(
            &current,
            actor,
            index,
            self.clock.now(),
        )?)
    }

    /// Re-derives waitlist positions 1..N in current order.
    pub fn compact_waitlist(&self, rule_id: &RuleId) -> Result<Vec<AllocationRequest>, ServiceError> {
        self.rules.get_rule(rule_id)?;
        self.waitlist_locks
            .with_lock(rule_id, || self.compact_locked(rule_id))
    }

    /// Moves the head of the waitlist back to APPROVED when the rule still has
    /// a seat nobody else is lined up for. Returns `None` when nothing moved.
    pub fn promote_from_waitlist(
        &self,
        rule_id: &RuleId,
        actor: &str,
    ) -> Result<Option<AllocationRequest>, ServiceError> {
        let rule = self.rules.get_rule(rule_id)?;
        self.waitlist_locks.with_lock(rule_id, || {
            let requests = self.requests.for_rule(rule_id)?;
            let claimed = requests
                .iter()
                .filter(|request| {
                    matches!(
                        request.status,
                        RequestStatus::Allocated | RequestStatus::Approved
                    )
                })
                .count() as u32;
            if claimed >= rule.available_seats() {
                debug!(rule_id = %rule_id, claimed, "no free seat to promote into");
                return Ok(None);
            }

            let Some(head) = requests
                .iter()
                .filter(|request| request.status == RequestStatus::Waitlisted)
                .min_by_key(|request| (request.waitlist_position(), request.sequence))
            else {
                return Ok(None);
            };

            let stored = self.apply(transitions::promote(head, actor, self.clock.now())?)?;
            self.compact_locked(rule_id)?;
            info!(request_id = %stored.id, rule_id = %rule_id, "request promoted from waitlist");
            Ok(Some(stored))
        })
    }

    /// Releases beds still bound to requests that no longer own them, e.g.
    /// after a crash between the bed update and the request save. Run it while
    /// no allocation is in flight. Returns the number of beds released.
    pub fn reconcile_bed_bindings(&self) -> Result<usize, ServiceError> {
        let mut released = 0;
        for bed in self.beds.occupied_beds()? {
            if bed.status() != BedStatus::Allocated {
                continue;
            }
            let Some(occupant) = bed.occupant().cloned() else {
                continue;
            };
            let Some(request_id) = occupant.request_id() else {
                continue;
            };
            let owned = self.requests.fetch(&request_id)?.is_some_and(|request| {
                request.status == RequestStatus::Allocated
                    && request
                        .allocation
                        .as_ref()
                        .is_some_and(|assignment| assignment.bed_id == bed.id)
            });
            if owned {
                continue;
            }
            if self.beds.release_occupant(&bed.id, &occupant)?.is_some() {
                warn!(bed_id = %bed.id, request_id = %request_id, "orphaned bed binding released");
                released += 1;
            }
        }
        Ok(released)
    }

    pub fn statistics(&self) -> Result<AllocationStatistics, ServiceError> {
        let requests = self.requests.all()?;
        let beds = self.beds.bed_counts()?;
        Ok(summarize(&requests, &beds))
    }

    fn compact_locked(&self, rule_id: &RuleId) -> Result<Vec<AllocationRequest>, ServiceError> {
        let mut waitlisted: Vec<AllocationRequest> = self
            .requests
            .for_rule(rule_id)?
            .into_iter()
            .filter(|request| request.status == RequestStatus::Waitlisted)
            .collect();
        waitlisted.sort_by_key(|request| (request.waitlist_position(), request.sequence));

        let now = self.clock.now();
        let mut compacted = Vec::with_capacity(waitlisted.len());
        for (index, request) in waitlisted.iter().enumerate() {
            let position = index as u32 + 1;
            if request.waitlist_position() == Some(position) {
                compacted.push(request.clone());
                continue;
            }
            let moved = transitions::reposition(request, position, self.days_per_position, now)?;
            compacted.push(self.apply(moved)?);
        }
        Ok(compacted)
    }

    fn apply(&self, transition: Transition) -> Result<AllocationRequest, ServiceError> {
        let stored = self.save(transition.request)?;
        self.emit(transition.events, &stored.id);
        Ok(stored)
    }

    fn save(&self, request: AllocationRequest) -> Result<AllocationRequest, ServiceError> {
        let id = request.id.clone();
        self.requests.update(request).map_err(|err| match err {
            RepositoryError::Conflict => ServiceError::conflict(format!(
                "allocation request {id} was modified concurrently"
            )),
            RepositoryError::NotFound => ServiceError::not_found("allocation request", &id),
            other => other.into(),
        })
    }

    fn emit(&self, events: Vec<DomainEvent>, id: &RequestId) {
        publish_all(
            self.events.as_ref(),
            events,
            self.clock.now(),
            Some(id.0.as_str()),
        );
    }
}

/// Dates a request allocation occupies, for checking against bookings.
fn stay_window(rule: &AllocationRule, now: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let start = now.date_naive();
    let end = rule.schedule.end_date.date_naive();
    if end > start {
        (start, end)
    } else {
        (start, start + Duration::days(1))
    }
}
