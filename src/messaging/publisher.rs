use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use super::transport::{DeliveryReport, OutboundMessage, Transport, TransportError, WireMessage};
use crate::events::{
    DomainEventEnvelope, EventPayload, NewDomainEvent, PayloadError, DOMAIN_EVENTS_TOPIC,
};
use crate::metrics::Metrics;

// ============================================================================
// Event Publisher
// ============================================================================
//
// Turns "aggregate X changed" into a message on the bus. The aggregate id is
// the message key, so one aggregate's events share a partition and stay in
// order; events for different aggregates carry no relative ordering.
//
// Delivery is whatever the transport gives: no retries, no outbox, no
// buffering across calls. A transport failure is handed back to the caller
// untouched. Callers that publish after committing a database transaction
// are left with a committed write and no event when this fails.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to serialize message for topic '{topic}': {source}")]
    Serialization {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Result of a successful `publish_event`
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub envelope: DomainEventEnvelope,
    pub delivery: DeliveryReport,
}

/// Shared by every call site of a service. `start` and `stop` bracket the
/// transport connection; all other methods take `&self`.
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<Metrics>>,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn start(&self) -> Result<(), PublishError> {
        self.transport.connect().await?;
        tracing::info!("Event publisher started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), PublishError> {
        self.transport.disconnect().await?;
        tracing::info!("Event publisher stopped");
        Ok(())
    }

    /// Serialize `messages` and send them to `topic` as one batch.
    ///
    /// Waits for the broker to acknowledge. On failure nothing is retried.
    pub async fn publish(
        &self,
        topic: &str,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<DeliveryReport>, PublishError> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let count = messages.len();

        let wire = messages
            .into_iter()
            .map(|message| {
                let payload = serde_json::to_vec(&message.value).map_err(|source| {
                    PublishError::Serialization {
                        topic: topic.to_string(),
                        source,
                    }
                })?;
                Ok(WireMessage {
                    // An empty key is sent as no key and gets round-robin routing
                    key: message.key.filter(|key| !key.is_empty()),
                    payload,
                    headers: message.headers,
                    timestamp_ms,
                })
            })
            .collect::<Result<Vec<_>, PublishError>>()?;

        let started = Instant::now();
        let result = self.transport.send(topic, wire).await;
        let elapsed = started.elapsed().as_secs_f64();

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(topic, count, elapsed, result.is_ok());
        }

        match result {
            Ok(reports) => {
                tracing::debug!(
                    topic = %topic,
                    messages = count,
                    reports = ?reports,
                    "Published to Kafka"
                );
                Ok(reports)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    topic = %topic,
                    messages = count,
                    "Failed to publish"
                );
                Err(e.into())
            }
        }
    }

    /// Wrap `event` in an envelope and publish it to `domain-events`,
    /// keyed by aggregate id.
    pub async fn publish_event(
        &self,
        event: NewDomainEvent,
    ) -> Result<PublishedEvent, PublishError> {
        let envelope = DomainEventEnvelope::wrap(event);
        let value = envelope
            .to_json()
            .map_err(|source| PublishError::Serialization {
                topic: DOMAIN_EVENTS_TOPIC.to_string(),
                source,
            })?;

        let message = OutboundMessage::keyed(envelope.aggregate_id(), value);
        let mut reports = self.publish(DOMAIN_EVENTS_TOPIC, vec![message]).await?;

        let delivery = reports.pop().ok_or_else(|| {
            PublishError::Transport(TransportError::Rejected {
                topic: DOMAIN_EVENTS_TOPIC.to_string(),
                reason: "no acknowledgment returned".to_string(),
            })
        })?;

        tracing::debug!(
            event_id = %envelope.event_id(),
            event_type = %envelope.event_type(),
            aggregate_id = %envelope.aggregate_id(),
            partition = delivery.partition,
            offset = delivery.offset,
            "Domain event published"
        );

        Ok(PublishedEvent { envelope, delivery })
    }

    /// Typed variant of `publish_event`. The payload is validated first.
    pub async fn publish_payload<P: EventPayload>(
        &self,
        aggregate_id: impl Into<String>,
        payload: &P,
        metadata: Option<serde_json::Value>,
    ) -> Result<PublishedEvent, PublishError> {
        let mut event = NewDomainEvent::from_payload(aggregate_id, payload)?;
        event.metadata = metadata;
        self.publish_event(event).await
    }
}
