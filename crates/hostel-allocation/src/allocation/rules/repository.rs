use super::domain::{AllocationRule, RuleId};
use crate::storage::RepositoryError;

pub trait RuleRepository: Send + Sync {
    fn insert(&self, rule: AllocationRule) -> Result<AllocationRule, RepositoryError>;
    /// Replaces the stored rule when `rule.version` is exactly one ahead of it.
    fn update(&self, rule: AllocationRule) -> Result<AllocationRule, RepositoryError>;
    fn fetch(&self, id: &RuleId) -> Result<Option<AllocationRule>, RepositoryError>;
    fn all(&self) -> Result<Vec<AllocationRule>, RepositoryError>;
}
