// ============================================================================
// Events - envelope and payload types shared by publishers and call sites
// ============================================================================

mod envelope;

pub use envelope::{DomainEventEnvelope, EventPayload, NewDomainEvent, PayloadError};

/// Topic used by `EventPublisher::publish_event`
pub const DOMAIN_EVENTS_TOPIC: &str = "domain-events";
