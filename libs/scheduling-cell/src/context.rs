// libs/scheduling-cell/src/context.rs
use std::sync::Arc;

use tracing::info;

use shared_config::{AppConfig, StoreBackend};
use shared_database::SupabaseClient;

use crate::models::SchedulingRules;
use crate::services::allocator::ResourceAllocatorService;
use crate::services::booking::BookingService;
use crate::services::exceptions::ExceptionService;
use crate::services::inventory::SlotInventoryService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notifications::{AppointmentNotifier, HttpNotifier, NoopNotifier};
use crate::services::slot_generator::SlotGenerator;
use crate::services::templates::TemplateService;
use crate::store::{InMemoryStore, SchedulingStore, SupabaseStore};

/// Every scheduling service wired to one store and one notifier. Shared
/// with the HTTP handlers as router state.
pub struct SchedulingContext {
    pub templates: TemplateService,
    pub exceptions: ExceptionService,
    pub generator: SlotGenerator,
    pub inventory: SlotInventoryService,
    pub booking: BookingService,
    pub lifecycle: AppointmentLifecycleService,
    pub allocator: ResourceAllocatorService,
}

impl SchedulingContext {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        notifier: Arc<dyn AppointmentNotifier>,
        rules: SchedulingRules,
    ) -> Self {
        Self {
            templates: TemplateService::new(store.clone()),
            exceptions: ExceptionService::new(store.clone()),
            generator: SlotGenerator::new(store.clone(), rules.clone()),
            inventory: SlotInventoryService::new(store.clone()),
            booking: BookingService::new(store.clone(), notifier.clone(), rules),
            lifecycle: AppointmentLifecycleService::new(store.clone(), notifier.clone()),
            allocator: ResourceAllocatorService::new(store, notifier),
        }
    }

    /// Isolated in-memory context with notifications switched off.
    pub fn in_memory(rules: SchedulingRules) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Arc::new(NoopNotifier), rules)
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let store: Arc<dyn SchedulingStore> = match config.store_backend {
            StoreBackend::Memory => {
                info!("Using in-memory scheduling store");
                Arc::new(InMemoryStore::new())
            }
            StoreBackend::Supabase => {
                info!("Using Supabase scheduling store at {}", config.supabase_url);
                Arc::new(SupabaseStore::new(Arc::new(SupabaseClient::new(config))))
            }
        };

        let notifier: Arc<dyn AppointmentNotifier> = if config.is_notification_configured() {
            Arc::new(HttpNotifier::new(config))
        } else {
            Arc::new(NoopNotifier)
        };

        Self::new(store, notifier, SchedulingRules::from_config(config))
    }
}
