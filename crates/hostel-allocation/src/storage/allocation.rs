use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::RepositoryError;
use crate::allocation::requests::{AllocationRequest, RequestId, RequestRepository};
use crate::allocation::rules::{AllocationRule, RuleId, RuleRepository, StudentId};

#[derive(Default, Clone)]
pub struct InMemoryRuleRepository {
    rules: Arc<Mutex<HashMap<RuleId, AllocationRule>>>,
}

impl RuleRepository for InMemoryRuleRepository {
    fn insert(&self, rule: AllocationRule) -> Result<AllocationRule, RepositoryError> {
        let mut rules = self.rules.lock().expect("rule mutex poisoned");
        if rules.contains_key(&rule.id) {
            return Err(RepositoryError::Conflict);
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    fn update(&self, rule: AllocationRule) -> Result<AllocationRule, RepositoryError> {
        let mut rules = self.rules.lock().expect("rule mutex poisoned");
        let stored = rules.get_mut(&rule.id).ok_or(RepositoryError::NotFound)?;
        if stored.version + 1 != rule.version {
            return Err(RepositoryError::Conflict);
        }
        *stored = rule.clone();
        Ok(rule)
    }

    fn fetch(&self, id: &RuleId) -> Result<Option<AllocationRule>, RepositoryError> {
        let rules = self.rules.lock().expect("rule mutex poisoned");
        Ok(rules.get(id).cloned())
    }

    fn all(&self) -> Result<Vec<AllocationRule>, RepositoryError> {
        let rules = self.rules.lock().expect("rule mutex poisoned");
        let mut all: Vec<AllocationRule> = rules.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

#[derive(Default)]
struct RequestTables {
    requests: HashMap<RequestId, AllocationRequest>,
    next_sequence: u64,
}

#[derive(Default, Clone)]
pub struct InMemoryRequestRepository {
    tables: Arc<Mutex<RequestTables>>,
}

fn by_sequence(mut requests: Vec<AllocationRequest>) -> Vec<AllocationRequest> {
    requests.sort_by_key(|request| request.sequence);
    requests
}

impl RequestRepository for InMemoryRequestRepository {
    fn insert(&self, mut request: AllocationRequest) -> Result<AllocationRequest, RepositoryError> {
        let mut tables = self.tables.lock().expect("request mutex poisoned");
        let duplicate = tables.requests.values().any(|existing| {
            existing.id == request.id
                || (existing.student_id == request.student_id
                    && existing.rule_id == request.rule_id)
        });
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        tables.next_sequence += 1;
        request.sequence = tables.next_sequence;
        tables.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn update(&self, mut request: AllocationRequest) -> Result<AllocationRequest, RepositoryError> {
        let mut tables = self.tables.lock().expect("request mutex poisoned");
        let stored = tables
            .requests
            .get_mut(&request.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != request.version {
            return Err(RepositoryError::Conflict);
        }
        request.version += 1;
        request.sequence = stored.sequence;
        *stored = request.clone();
        Ok(request)
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<AllocationRequest>, RepositoryError> {
        let tables = self.tables.lock().expect("request mutex poisoned");
        Ok(tables.requests.get(id).cloned())
    }

    fn for_rule(&self, rule_id: &RuleId) -> Result<Vec<AllocationRequest>, RepositoryError> {
        let tables = self.tables.lock().expect("request mutex poisoned");
        Ok(by_sequence(
            tables
                .requests
                .values()
                .filter(|request| &request.rule_id == rule_id)
                .cloned()
                .collect(),
        ))
    }

    fn for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<AllocationRequest>, RepositoryError> {
        let tables = self.tables.lock().expect("request mutex poisoned");
        Ok(by_sequence(
            tables
                .requests
                .values()
                .filter(|request| &request.student_id == student_id)
                .cloned()
                .collect(),
        ))
    }

    fn all(&self) -> Result<Vec<AllocationRequest>, RepositoryError> {
        let tables = self.tables.lock().expect("request mutex poisoned");
        Ok(by_sequence(tables.requests.values().cloned().collect()))
    }
}
