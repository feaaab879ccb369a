//! Startup wiring: builds every service from its stores and hands out the
//! combined HTTP router.

use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::allocation::requests::RequestRepository;
use crate::allocation::rules::RuleRepository;
use crate::allocation::{
    allocation_router, AllocationApi, AllocationProcessor, AllocationRequestService, RuleCatalog,
};
use crate::bookings::{booking_router, BookingRepository, BookingService};
use crate::clock::Clock;
use crate::config::AllocationConfig;
use crate::events::EventPublisher;
use crate::inventory::{
    inventory_router, spawn_hold_sweeper, BedLifecycleManager, HoldPolicy, InventoryCatalog,
    InventoryRepository,
};
use crate::storage::{
    InMemoryBookingRepository, InMemoryInventoryRepository, InMemoryRequestRepository,
    InMemoryRuleRepository,
};

/// Repository handles the engine is assembled from.
#[derive(Clone)]
pub struct EngineStores {
    pub inventory: Arc<dyn InventoryRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub requests: Arc<dyn RequestRepository>,
}

impl EngineStores {
    pub fn in_memory() -> Self {
        Self {
            inventory: Arc::new(InMemoryInventoryRepository::default()),
            bookings: Arc::new(InMemoryBookingRepository::default()),
            rules: Arc::new(InMemoryRuleRepository::default()),
            requests: Arc::new(InMemoryRequestRepository::default()),
        }
    }
}

pub struct AllocationEngine {
    pub catalog: Arc<InventoryCatalog>,
    pub beds: Arc<BedLifecycleManager>,
    pub bookings: Arc<BookingService>,
    pub rules: Arc<RuleCatalog>,
    pub requests: Arc<AllocationRequestService>,
    pub processor: Arc<AllocationProcessor>,
    config: AllocationConfig,
}

impl AllocationEngine {
    pub fn new(
        stores: EngineStores,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: AllocationConfig,
    ) -> Self {
        let catalog = Arc::new(InventoryCatalog::new(stores.inventory.clone()));
        let beds = Arc::new(BedLifecycleManager::new(
            stores.inventory,
            events.clone(),
            clock.clone(),
            HoldPolicy::from(&config),
        ));
        let bookings = Arc::new(BookingService::new(
            stores.bookings,
            beds.clone(),
            events.clone(),
            clock.clone(),
        ));
        let rules = Arc::new(RuleCatalog::new(stores.rules, clock.clone()));
        let requests = Arc::new(AllocationRequestService::new(
            stores.requests,
            rules.clone(),
            beds.clone(),
            bookings.validator().clone(),
            events,
            clock.clone(),
            config.waitlist_days_per_position,
        ));
        let processor = Arc::new(AllocationProcessor::new(
            requests.clone(),
            rules.clone(),
            beds.clone(),
            clock,
        ));

        Self {
            catalog,
            beds,
            bookings,
            rules,
            requests,
            processor,
            config,
        }
    }

    pub fn in_memory(
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: AllocationConfig,
    ) -> Self {
        Self::new(EngineStores::in_memory(), events, clock, config)
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    /// Bed, booking and allocation endpoints under `/api/v1`.
    pub fn router(&self) -> Router {
        inventory_router(self.beds.clone())
            .merge(booking_router(self.bookings.clone()))
            .merge(allocation_router(AllocationApi {
                rules: self.rules.clone(),
                requests: self.requests.clone(),
                processor: self.processor.clone(),
            }))
    }

    /// Starts the hold reaper on the configured interval.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        spawn_hold_sweeper(self.beds.clone(), self.config.sweep_interval(), cancel)
    }
}
