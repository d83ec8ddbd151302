use async_trait::async_trait;
use std::collections::BTreeMap;

// ============================================================================
// Transport - the seam between the publisher and a broker client
// ============================================================================
//
// `KafkaTransport` talks to a real cluster; `InMemoryTransport` is the fake
// broker used by tests. Implementations must be safe to call concurrently:
// the publisher shares one transport across every call site and does no
// locking of its own.
//
// ============================================================================

/// A message as a caller hands it to `EventPublisher::publish`
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub key: Option<String>,
    pub value: serde_json::Value,
    pub headers: BTreeMap<String, String>,
}

impl OutboundMessage {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            key: None,
            value,
            headers: BTreeMap::new(),
        }
    }

    pub fn keyed(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(value).with_key(key)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Serialized form handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    /// Producer wall clock, epoch milliseconds
    pub timestamp_ms: i64,
}

/// Broker acknowledgment for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error(transparent)]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("broker rejected batch for topic '{topic}': {reason}")]
    Rejected { topic: String, reason: String },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection. Called once when the owning component starts.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Flush and tear down. Called once when the owning component stops.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send a batch to `topic` and wait for the broker to acknowledge it.
    /// Reports come back in the same order as `messages`.
    async fn send(
        &self,
        topic: &str,
        messages: Vec<WireMessage>,
    ) -> Result<Vec<DeliveryReport>, TransportError>;
}
