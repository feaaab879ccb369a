//! Allocation rules: who may apply, for which beds, and in what order.

mod catalog;
pub mod domain;
pub mod matching;
pub mod repository;

pub use catalog::RuleCatalog;
pub use domain::{
    AllocationMethod, AllocationRule, AllocationTarget, ApplicantProfile, EligibilityCriteria,
    KycStatus, RuleDefinition, RuleId, RuleSchedule, ScoreRange, SeatQuotas, StudentId, YearRange,
};
pub use matching::{unmet_criteria, Criterion};
pub use repository::RuleRepository;
