//! Rule-driven allocation: the rule catalog, the request workflow, bed
//! placement and the batch processor.

pub(crate) mod locks;
pub mod placement;
pub mod processor;
pub mod requests;
pub mod router;
pub mod rules;
pub mod statistics;

pub use processor::{order_requests, AllocationProcessor, ProcessingSummary, PROCESSOR_ACTOR};
pub use requests::{AllocationRequest, AllocationRequestService, RequestId, RequestStatus};
pub use router::{allocation_router, AllocationApi};
pub use rules::{AllocationRule, RuleCatalog, RuleDefinition, RuleId, StudentId};
pub use statistics::{AllocationStatistics, RuleStatistics};
