pub mod context;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use context::SchedulingContext;
pub use models::{SchedulingError, SchedulingRules};
pub use router::scheduling_routes;
pub use store::{InMemoryStore, SchedulingStore, SupabaseStore};
