use super::domain::{AllocationRequest, RequestId};
use crate::allocation::rules::{RuleId, StudentId};
use crate::storage::RepositoryError;

/// Storage for allocation requests.
///
/// `insert` rejects a second request for the same (student, rule) pair with
/// `Conflict` and stamps the request's `sequence`. `update` is optimistic: the
/// caller's `version` must equal the stored one.
pub trait RequestRepository: Send + Sync {
    fn insert(&self, request: AllocationRequest) -> Result<AllocationRequest, RepositoryError>;
    fn update(&self, request: AllocationRequest) -> Result<AllocationRequest, RepositoryError>;
    fn fetch(&self, id: &RequestId) -> Result<Option<AllocationRequest>, RepositoryError>;
    /// Ordered by `sequence`.
    fn for_rule(&self, rule_id: &RuleId) -> Result<Vec<AllocationRequest>, RepositoryError>;
    fn for_student(&self, student_id: &StudentId)
        -> Result<Vec<AllocationRequest>, RepositoryError>;
    fn all(&self) -> Result<Vec<AllocationRequest>, RepositoryError>;
}
