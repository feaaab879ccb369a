use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::locks::SingleFlight;
use super::placement::rank_candidates;
use super::requests::{AllocationRequest, AllocationRequestService, RequestStatus};
use super::rules::{AllocationMethod, RuleCatalog, RuleId};
use crate::clock::Clock;
use crate::error::ServiceError;
use crate::inventory::BedLifecycleManager;

pub const PROCESSOR_ACTOR: &str = "allocation-processor";
const NO_CAPACITY: &str = "no capacity available";

/// Outcome counters of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingSummary {
    pub allocated: usize,
    pub waitlisted: usize,
    pub errors: usize,
}

/// Batch decision for all approved requests under one rule.
pub struct AllocationProcessor {
    requests: Arc<AllocationRequestService>,
    rules: Arc<RuleCatalog>,
    beds: Arc<BedLifecycleManager>,
    clock: Arc<dyn Clock>,
    in_flight: SingleFlight<RuleId>,
}

/// Processing order for a rule's approved requests.
pub fn order_requests(requests: &mut [AllocationRequest], method: AllocationMethod) {
    requests.sort_by(|a, b| {
        let arrival = a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.sequence.cmp(&b.sequence));
        match method {
            AllocationMethod::FirstComeFirstServed => arrival,
            AllocationMethod::Priority => b
                .priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(Ordering::Equal)
                .then(arrival),
        }
    });
}

impl AllocationProcessor {
    pub fn new(
        requests: Arc<AllocationRequestService>,
        rules: Arc<RuleCatalog>,
        beds: Arc<BedLifecycleManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests,
            rules,
            beds,
            clock,
            in_flight: SingleFlight::new(),
        }
    }

    /// Allocates while seats remain, then waitlists while the waitlist has
    /// room, then rejects. Only APPROVED requests are touched, so a re-run
    /// picks up where an earlier one stopped.
    pub fn process_rule(&self, rule_id: &RuleId) -> Result<ProcessingSummary, ServiceError> {
        let rule = self.rules.get_rule(rule_id)?;
        if !rule.active {
            return Err(ServiceError::validation(format!(
                "rule {rule_id} is inactive and cannot be processed"
            )));
        }
        let now = self.clock.now();
        if !rule.is_allocation_window(now) {
            return Err(ServiceError::validation(format!(
                "rule {rule_id} is outside its allocation window ({} to {})",
                rule.schedule.allocation_start_date, rule.schedule.allocation_end_date
            )));
        }
        let Some(_flight) = self.in_flight.try_acquire(rule_id) else {
            return Err(ServiceError::conflict(format!(
                "allocation for rule {rule_id} is already running"
            )));
        };

        let requests = self.requests.for_rule(rule_id)?;
        let count = |status: RequestStatus| {
            requests
                .iter()
                .filter(|request| request.status == status)
                .count() as u32
        };
        let mut seats_left = rule.available_seats().saturating_sub(count(RequestStatus::Allocated));
        let mut waitlist_left = rule
            .quotas
            .waitlist_capacity
            .saturating_sub(count(RequestStatus::Waitlisted));

        let mut approved: Vec<AllocationRequest> = requests
            .iter()
            .filter(|request| request.status == RequestStatus::Approved)
            .cloned()
            .collect();
        order_requests(&mut approved, rule.target.allocation_method);

        info!(
            rule_id = %rule_id,
            approved = approved.len(),
            seats_left,
            waitlist_left,
            method = rule.target.allocation_method.label(),
            "allocation run started"
        );

        let mut placements = self.beds.open_placements()?;
        let mut summary = ProcessingSummary::default();
        let mut rejected = 0usize;

        for request in &approved {
            if seats_left > 0 {
                let candidates = rank_candidates(&placements, &rule, request);
                match self
                    .requests
                    .allocate_into(request, &rule, &candidates, PROCESSOR_ACTOR)
                {
                    Ok(allocated) => {
                        if let Some(bed_id) = allocated.allocation.as_ref().map(|a| &a.bed_id) {
                            placements.retain(|placement| &placement.bed.id != bed_id);
                        }
                        seats_left -= 1;
                        summary.allocated += 1;
                    }
                    Err(err) => {
                        summary.errors += 1;
                        warn!(request_id = %request.id, error = %err, "allocation failed");
                    }
                }
            } else if waitlist_left > 0 {
                match self.requests.waitlist(&request.id, PROCESSOR_ACTOR) {
                    Ok(_) => {
                        waitlist_left -= 1;
                        summary.waitlisted += 1;
                    }
                    Err(err) => {
                        summary.errors += 1;
                        warn!(request_id = %request.id, error = %err, "waitlisting failed");
                    }
                }
            } else {
                match self.requests.reject(&request.id, PROCESSOR_ACTOR, NO_CAPACITY) {
                    Ok(_) => rejected += 1,
                    Err(err) => {
                        summary.errors += 1;
                        warn!(request_id = %request.id, error = %err, "rejection failed");
                    }
                }
            }
        }

        info!(
            rule_id = %rule_id,
            allocated = summary.allocated,
            waitlisted = summary.waitlisted,
            rejected,
            errors = summary.errors,
            "allocation run finished"
        );
        Ok(summary)
    }
}
