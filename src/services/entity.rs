use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::store::{EntityName, EntityRecord, EntityStore, StoreError};
use crate::events::NewDomainEvent;
use crate::messaging::{EventPublisher, PublishError};
use crate::metrics::Metrics;

// ============================================================================
// Entity Service - commit, then announce, then count
// ============================================================================
//
// Each write:
//   1. runs in its own committed store transaction
//   2. publishes "<entity>.<operation>" to domain-events, keyed by id
//   3. increments entity_operations_total{entity, operation}
//
// Steps 1 and 2 are not atomic. If the publish fails the row stays
// committed, the error goes back to the caller and step 3 is skipped.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: Uuid },

    /// The write is committed; only the event is missing.
    #[error("{entity} {id} committed but its event was not published: {source}")]
    Publish {
        entity: String,
        id: Uuid,
        #[source]
        source: PublishError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Created,
    Updated,
    Deleted,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Created => "created",
            Operation::Updated => "updated",
            Operation::Deleted => "deleted",
        }
    }
}

pub struct EntityService {
    entity: EntityName,
    store: Arc<dyn EntityStore>,
    publisher: EventPublisher,
    metrics: Arc<Metrics>,
}

impl EntityService {
    pub fn new(
        entity: EntityName,
        store: Arc<dyn EntityStore>,
        publisher: EventPublisher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            entity,
            store,
            publisher,
            metrics,
        }
    }

    pub fn entity(&self) -> &EntityName {
        &self.entity
    }

    pub async fn create(&self, data: Value) -> Result<EntityRecord, ServiceError> {
        let record = self.store.insert(&self.entity, data).await?;
        self.announce(Operation::Created, &record).await?;
        Ok(record)
    }

    pub async fn update(&self, id: Uuid, data: Value) -> Result<EntityRecord, ServiceError> {
        let record = self
            .store
            .update(&self.entity, id, data)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        self.announce(Operation::Updated, &record).await?;
        Ok(record)
    }

    pub async fn delete(&self, id: Uuid) -> Result<EntityRecord, ServiceError> {
        let record = self
            .store
            .delete(&self.entity, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        self.announce(Operation::Deleted, &record).await?;
        Ok(record)
    }

    async fn announce(
        &self,
        operation: Operation,
        record: &EntityRecord,
    ) -> Result<(), ServiceError> {
        let event_type = format!("{}.{}", self.entity, operation.as_str());
        let publish_failed = |source: PublishError| ServiceError::Publish {
            entity: self.entity.to_string(),
            id: record.id,
            source,
        };

        let data = serde_json::to_value(record).map_err(|source| {
            publish_failed(PublishError::Serialization {
                topic: crate::events::DOMAIN_EVENTS_TOPIC.to_string(),
                source,
            })
        })?;

        if let Err(e) = self
            .publisher
            .publish_event(NewDomainEvent::new(&event_type, record.id.to_string(), data))
            .await
        {
            tracing::warn!(
                entity = %self.entity,
                id = %record.id,
                event_type = %event_type,
                "Write committed but event was not published"
            );
            return Err(publish_failed(e));
        }

        self.metrics
            .record_entity_operation(self.entity.as_str(), operation.as_str());
        Ok(())
    }

    fn not_found(&self, id: Uuid) -> ServiceError {
        ServiceError::NotFound {
            entity: self.entity.to_string(),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{InMemoryTransport, TransportError};
    use crate::services::InMemoryEntityStore;
    use serde_json::json;

    struct Fixture {
        broker: Arc<InMemoryTransport>,
        store: Arc<InMemoryEntityStore>,
        metrics: Arc<Metrics>,
        service: EntityService,
    }

    async fn fixture(entity: &str) -> Fixture {
        let broker = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryEntityStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let publisher = EventPublisher::new(broker.clone());
        publisher.start().await.unwrap();

        let service = EntityService::new(
            EntityName::new(entity).unwrap(),
            store.clone(),
            publisher,
            metrics.clone(),
        );
        Fixture {
            broker,
            store,
            metrics,
            service,
        }
    }

    fn counter(metrics: &Metrics, entity: &str, operation: &str) -> u64 {
        metrics
            .entity_operations
            .with_label_values(&[entity, operation])
            .get()
    }

    #[tokio::test]
    async fn test_create_commits_publishes_and_counts() {
        let f = fixture("auth").await;

        let record = f.service.create(json!({"email": "x@boomcard.bg"})).await.unwrap();

        assert!(f.store.get(f.service.entity(), record.id).is_some());

        let captured = f.broker.messages_for("domain-events");
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].key.as_deref(), Some(record.id.to_string().as_str()));

        let envelope = captured[0].json().unwrap();
        assert_eq!(envelope["eventType"], "auth.created");
        assert_eq!(envelope["data"]["data"]["email"], "x@boomcard.bg");
        assert_eq!(envelope["data"]["id"], record.id.to_string());

        assert_eq!(counter(&f.metrics, "auth", "created"), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_emit_events() {
        let f = fixture("users").await;
        let record = f.service.create(json!({"name": "Ivan"})).await.unwrap();

        f.service.update(record.id, json!({"name": "Maria"})).await.unwrap();
        let deleted = f.service.delete(record.id).await.unwrap();
        assert_eq!(deleted.data["name"], "Maria");

        let types: Vec<String> = f
            .broker
            .messages()
            .iter()
            .map(|m| m.json().unwrap()["eventType"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["users.created", "users.updated", "users.deleted"]);
        assert!(f.store.is_empty());
        assert_eq!(counter(&f.metrics, "users", "deleted"), 1);
    }

    #[tokio::test]
    async fn test_missing_id_is_not_found_and_publishes_nothing() {
        let f = fixture("notifications").await;
        let id = Uuid::new_v4();

        let err = f.service.update(id, json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { id: missing, .. } if missing == id));
        assert!(matches!(f.service.delete(id).await, Err(ServiceError::NotFound { .. })));
        assert!(f.broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_write_committed() {
        let f = fixture("auth").await;
        f.broker.set_unavailable(true);

        let err = f.service.create(json!({"email": "lost@boomcard.bg"})).await.unwrap_err();
        let id = match err {
            ServiceError::Publish {
                id,
                source: PublishError::Transport(TransportError::Rejected { .. }),
                ..
            } => id,
            other => panic!("unexpected error: {other:?}"),
        };

        // Row is committed, event is gone, counter untouched
        assert!(f.store.get(f.service.entity(), id).is_some());
        assert!(f.broker.messages().is_empty());
        assert_eq!(counter(&f.metrics, "auth", "created"), 0);
    }

    #[tokio::test]
    async fn test_store_failure_publishes_nothing() {
        let f = fixture("scheduler").await;
        f.store.set_unavailable(true);

        let err = f.service.create(json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Unavailable(_))));
        assert!(f.broker.messages().is_empty());
    }
}
