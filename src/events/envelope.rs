use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// Domain Event Envelope - wire format for the `domain-events` topic
// ============================================================================
//
// {
//   "eventId":     "<uuid v4>",
//   "eventType":   "auth.created",
//   "aggregateId": "abc-123",
//   "timestamp":   "2026-10-16T08:15:30.123Z",
//   "data":        { ... },
//   "metadata":    { ... }            // {} when the caller gave none
// }
//
// There is no schema version field. Consumers cannot detect drift between
// producers from the envelope alone.
//
// ============================================================================

/// What a call site hands to `EventPublisher::publish_event`
#[derive(Debug, Clone, PartialEq)]
pub struct NewDomainEvent {
    pub event_type: String,
    pub aggregate_id: String,
    pub data: Value,
    pub metadata: Option<Value>,
}

impl NewDomainEvent {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            data,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build an event from a typed payload, validating it first
    pub fn from_payload<P: EventPayload>(
        aggregate_id: impl Into<String>,
        payload: &P,
    ) -> Result<Self, PayloadError> {
        payload.validate().map_err(|reason| PayloadError::Invalid {
            event_type: P::EVENT_TYPE,
            reason,
        })?;

        let data = serde_json::to_value(payload)?;
        Ok(Self::new(P::EVENT_TYPE, aggregate_id, data))
    }
}

/// Immutable once built. Fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEventEnvelope {
    event_id: Uuid,
    event_type: String,
    aggregate_id: String,
    timestamp: String,
    data: Value,
    #[serde(default = "empty_object")]
    metadata: Value,
}

impl DomainEventEnvelope {
    /// Wrap an event with a fresh id and the current producer wall clock
    pub fn wrap(event: NewDomainEvent) -> Self {
        Self::wrap_at(event, Utc::now())
    }

    pub(crate) fn wrap_at(event: NewDomainEvent, now: DateTime<Utc>) -> Self {
        let metadata = match event.metadata {
            None | Some(Value::Null) => empty_object(),
            Some(other) => other,
        };

        Self {
            event_id: Uuid::new_v4(),
            event_type: event.event_type,
            aggregate_id: event.aggregate_id,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            data: event.data,
            metadata,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// ISO-8601 string as it appears on the wire
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

// ============================================================================
// Typed payloads
// ============================================================================

/// A strongly typed event body, validated before it becomes envelope `data`
pub trait EventPayload: Serialize {
    const EVENT_TYPE: &'static str;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid {event_type} payload: {reason}")]
    Invalid {
        event_type: &'static str,
        reason: String,
    },

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
