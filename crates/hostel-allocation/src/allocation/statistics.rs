use std::collections::BTreeMap;

use serde::Serialize;

use super::requests::{AllocationRequest, RequestStatus};
use super::rules::RuleId;
use crate::inventory::BedStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStatistics {
    pub rule_id: RuleId,
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
}

/// Point-in-time counts for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationStatistics {
    pub total_requests: usize,
    pub requests_by_status: BTreeMap<&'static str, usize>,
    pub rules: Vec<RuleStatistics>,
    pub beds_by_status: BTreeMap<&'static str, usize>,
}

fn empty_status_map() -> BTreeMap<&'static str, usize> {
    RequestStatus::ALL
        .into_iter()
        .map(|status| (status.label(), 0))
        .collect()
}

pub fn summarize(requests: &[AllocationRequest], beds: &[(BedStatus, usize)]) -> AllocationStatistics {
    let mut requests_by_status = empty_status_map();
    let mut per_rule: BTreeMap<RuleId, BTreeMap<&'static str, usize>> = BTreeMap::new();

    for request in requests {
        *requests_by_status.entry(request.status.label()).or_default() += 1;
        *per_rule
            .entry(request.rule_id.clone())
            .or_insert_with(empty_status_map)
            .entry(request.status.label())
            .or_default() += 1;
    }

    let rules = per_rule
        .into_iter()
        .map(|(rule_id, by_status)| RuleStatistics {
            rule_id,
            total: by_status.values().sum(),
            by_status,
        })
        .collect();

    AllocationStatistics {
        total_requests: requests.len(),
        requests_by_status,
        rules,
        beds_by_status: beds
            .iter()
            .map(|(status, count)| (status.label(), *count))
            .collect(),
    }
}
