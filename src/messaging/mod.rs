// ============================================================================
// Messaging - outbound event publishing
// ============================================================================
//
// - transport  - the `Transport` seam and its wire types
// - kafka      - librdkafka-backed transport
// - in_memory  - fake broker for tests and local runs
// - publisher  - `EventPublisher`, used by the CRUD call sites
//
// ============================================================================

mod in_memory;
mod kafka;
mod publisher;
mod transport;

pub use in_memory::{CapturedMessage, InMemoryTransport};
pub use kafka::KafkaTransport;
pub use publisher::{EventPublisher, PublishError, PublishedEvent};
pub use transport::{DeliveryReport, OutboundMessage, Transport, TransportError, WireMessage};
