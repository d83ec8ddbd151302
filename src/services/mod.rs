// ============================================================================
// Services - CRUD call sites that announce committed writes
// ============================================================================

mod entity;
mod store;

pub use entity::{EntityService, ServiceError};
pub use store::{
    EntityName, EntityRecord, EntityStore, InMemoryEntityStore, PgEntityStore, StoreError,
};
