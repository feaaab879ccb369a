use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::domain::{AllocationRule, ApplicantProfile, RuleDefinition, RuleId};
use super::repository::RuleRepository;
use crate::clock::Clock;
use crate::error::ServiceError;
use crate::storage::RepositoryError;

/// Versioned allocation rules with their schedule windows and quotas.
pub struct RuleCatalog {
    repository: Arc<dyn RuleRepository>,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

impl RuleCatalog {
    pub fn new(repository: Arc<dyn RuleRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            sequence: AtomicU64::new(1),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn create_rule(&self, definition: RuleDefinition) -> Result<AllocationRule, ServiceError> {
        validate_definition(&definition)?;

        let now = self.clock.now();
        let id = RuleId(format!(
            "rule-{:04}",
            self.sequence.fetch_add(1, Ordering::Relaxed)
        ));
        let rule = apply_definition(id, definition, 1, now, now);
        let stored = self.repository.insert(rule)?;

        info!(
            rule_id = %stored.id,
            name = %stored.name,
            priority = stored.priority,
            seats = stored.quotas.total_seats,
            "allocation rule created"
        );
        Ok(stored)
    }

    /// Replaces the rule's definition and bumps its version.
    pub fn update_rule(
        &self,
        id: &RuleId,
        definition: RuleDefinition,
    ) -> Result<AllocationRule, ServiceError> {
        validate_definition(&definition)?;
        let current = self.get_rule(id)?;
        let next = apply_definition(
            current.id.clone(),
            definition,
            current.version + 1,
            current.created_at,
            self.clock.now(),
        );
        let stored = self.save(next)?;
        info!(rule_id = %stored.id, version = stored.version, "allocation rule updated");
        Ok(stored)
    }

    pub fn deactivate_rule(&self, id: &RuleId) -> Result<AllocationRule, ServiceError> {
        let current = self.get_rule(id)?;
        if !current.active {
            return Ok(current);
        }
        let mut next = current;
        next.active = false;
        next.version += 1;
        next.updated_at = self.clock.now();
        let stored = self.save(next)?;
        info!(rule_id = %stored.id, "allocation rule deactivated");
        Ok(stored)
    }

    pub fn get_rule(&self, id: &RuleId) -> Result<AllocationRule, ServiceError> {
        self.repository
            .fetch(id)?
            .ok_or_else(|| ServiceError::not_found("allocation rule", id))
    }

    /// Active rules whose overall window contains `now`, highest priority first.
    pub fn active_rules_for(&self, now: DateTime<Utc>) -> Result<Vec<AllocationRule>, ServiceError> {
        let mut rules: Vec<AllocationRule> = self
            .repository
            .all()?
            .into_iter()
            .filter(|rule| rule.active && rule.schedule.is_live(now))
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }

    /// Rules the applicant could apply to right now.
    pub fn eligible_rules_for(
        &self,
        profile: &ApplicantProfile,
        now: DateTime<Utc>,
    ) -> Result<Vec<AllocationRule>, ServiceError> {
        Ok(self
            .active_rules_for(now)?
            .into_iter()
            .filter(|rule| rule.can_apply(now) && rule.matches(profile))
            .collect())
    }

    fn save(&self, rule: AllocationRule) -> Result<AllocationRule, ServiceError> {
        let id = rule.id.clone();
        self.repository.update(rule).map_err(|err| match err {
            RepositoryError::Conflict => {
                ServiceError::conflict(format!("allocation rule {id} was modified concurrently"))
            }
            RepositoryError::NotFound => ServiceError::not_found("allocation rule", &id),
            other => other.into(),
        })
    }
}

fn apply_definition(
    id: RuleId,
    definition: RuleDefinition,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> AllocationRule {
    AllocationRule {
        id,
        name: definition.name.trim().to_string(),
        priority: definition.priority,
        active: definition.active,
        criteria: definition.criteria,
        target: definition.target,
        quotas: definition.quotas,
        schedule: definition.schedule,
        version,
        created_at,
        updated_at,
    }
}

fn validate_definition(definition: &RuleDefinition) -> Result<(), ServiceError> {
    if definition.name.trim().is_empty() {
        return Err(ServiceError::validation("rule name must not be empty"));
    }

    let quotas = definition.quotas;
    if quotas.reserved_seats > quotas.total_seats {
        return Err(ServiceError::validation(format!(
            "reserved seats ({}) exceed total seats ({})",
            quotas.reserved_seats, quotas.total_seats
        )));
    }

    let schedule = definition.schedule;
    if !(schedule.start_date <= schedule.application_deadline
        && schedule.application_deadline <= schedule.end_date)
    {
        return Err(ServiceError::validation(
            "schedule must satisfy start date <= application deadline <= end date",
        ));
    }
    if schedule.allocation_start_date > schedule.allocation_end_date {
        return Err(ServiceError::validation(
            "allocation start date must not be after allocation end date",
        ));
    }

    let criteria = &definition.criteria;
    if criteria.year_range.is_some_and(|range| range.min > range.max) {
        return Err(ServiceError::validation("year range minimum exceeds maximum"));
    }
    if criteria
        .seniority_score_range
        .is_some_and(|range| range.min > range.max)
    {
        return Err(ServiceError::validation(
            "seniority score range minimum exceeds maximum",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::rules::{
        EligibilityCriteria, KycStatus, RuleSchedule, SeatQuotas, StudentId, YearRange,
    };
    use crate::clock::ManualClock;
    use crate::storage::InMemoryRuleRepository;
    use chrono::{Duration, TimeZone};

    fn opening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn catalog() -> (RuleCatalog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(opening() + Duration::days(1)));
        let catalog = RuleCatalog::new(Arc::new(InMemoryRuleRepository::default()), clock.clone());
        (catalog, clock)
    }

    fn definition(name: &str, priority: i32, categories: &[&str]) -> RuleDefinition {
        RuleDefinition {
            name: name.to_string(),
            priority,
            active: true,
            criteria: EligibilityCriteria {
                year_range: Some(YearRange { min: 1, max: 3 }),
                categories: categories.iter().map(|c| c.to_string()).collect(),
                ..EligibilityCriteria::default()
            },
            target: Default::default(),
            quotas: SeatQuotas {
                total_seats: 10,
                reserved_seats: 2,
                waitlist_capacity: 5,
            },
            schedule: RuleSchedule {
                start_date: opening(),
                application_deadline: opening() + Duration::days(14),
                end_date: opening() + Duration::days(60),
                allocation_start_date: opening() + Duration::days(15),
                allocation_end_date: opening() + Duration::days(20),
            },
        }
    }

    fn applicant() -> ApplicantProfile {
        ApplicantProfile {
            student_id: StudentId("stu-1".to_string()),
            year: 2,
            category: "OBC".to_string(),
            domicile_state: "Kerala".to_string(),
            program: "BTech".to_string(),
            seniority_score: Some(60.0),
            kyc_status: KycStatus::Verified,
            gender: None,
        }
    }

    #[test]
    fn active_rules_are_ordered_by_priority() {
        let (catalog, clock) = catalog();
        catalog.create_rule(definition("General", 1, &[])).expect("rule");
        catalog
            .create_rule(definition("Reserved", 5, &["SC", "ST"]))
            .expect("rule");
        let retired = catalog.create_rule(definition("Old", 9, &[])).expect("rule");
        catalog.deactivate_rule(&retired.id).expect("deactivate");

        let names: Vec<String> = catalog
            .active_rules_for(clock.now())
            .expect("rules")
            .into_iter()
            .map(|rule| rule.name)
            .collect();
        assert_eq!(names, vec!["Reserved".to_string(), "General".to_string()]);
    }

    #[test]
    fn eligible_rules_respect_criteria_and_deadline() {
        let (catalog, clock) = catalog();
        catalog.create_rule(definition("Open", 1, &["GEN", "OBC"])).expect("rule");
        catalog.create_rule(definition("Reserved", 5, &["SC", "ST"])).expect("rule");

        let eligible = catalog
            .eligible_rules_for(&applicant(), clock.now())
            .expect("rules");
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].name, "Open");

        clock.advance(Duration::days(30));
        assert!(catalog
            .eligible_rules_for(&applicant(), clock.now())
            .expect("rules")
            .is_empty());
    }

    #[test]
    fn update_bumps_version_and_validates() {
        let (catalog, _clock) = catalog();
        let rule = catalog.create_rule(definition("General", 1, &[])).expect("rule");
        assert_eq!(rule.version, 1);

        let mut changed = definition("General", 3, &[]);
        changed.quotas.total_seats = 12;
        let updated = catalog.update_rule(&rule.id, changed).expect("update");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.available_seats(), 10);
        assert_eq!(updated.created_at, rule.created_at);

        let mut broken = definition("General", 3, &[]);
        broken.quotas.reserved_seats = 20;
        assert!(matches!(
            catalog.update_rule(&rule.id, broken),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn schedule_order_is_enforced() {
        let (catalog, _clock) = catalog();
        let mut backwards = definition("Backwards", 1, &[]);
        backwards.schedule.application_deadline = opening() + Duration::days(90);
        assert!(matches!(
            catalog.create_rule(backwards),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn windows_are_inclusive() {
        let (catalog, _clock) = catalog();
        let rule = catalog.create_rule(definition("General", 1, &[])).expect("rule");
        assert!(rule.can_apply(rule.schedule.application_deadline));
        assert!(!rule.can_apply(rule.schedule.application_deadline + Duration::seconds(1)));
        assert!(rule.is_allocation_window(rule.schedule.allocation_end_date));
        assert!(!rule.is_allocation_window(rule.schedule.allocation_start_date - Duration::seconds(1)));
    }
}
