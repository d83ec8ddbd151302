use boomcard_events::events::{DomainEventEnvelope, NewDomainEvent, DOMAIN_EVENTS_TOPIC};
use boomcard_events::messaging::{EventPublisher, InMemoryTransport, PublishError, TransportError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

async fn publisher_with_broker(partitions: i32) -> (Arc<InMemoryTransport>, EventPublisher) {
    let broker = Arc::new(
        InMemoryTransport::with_partitions(partitions).with_known_topics([DOMAIN_EVENTS_TOPIC]),
    );
    let publisher = EventPublisher::new(broker.clone());
    publisher.start().await.expect("fake broker connects");
    (broker, publisher)
}

#[tokio::test]
async fn auth_created_lands_on_domain_events() {
    let (broker, publisher) = publisher_with_broker(3).await;

    publisher
        .publish_event(NewDomainEvent::new("auth.created", "abc-123", json!({"name": "X"})))
        .await
        .unwrap();

    let captured = broker.messages();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].topic, "domain-events");
    assert_eq!(captured[0].key.as_deref(), Some("abc-123"));

    let envelope: DomainEventEnvelope = serde_json::from_slice(&captured[0].payload).unwrap();
    assert_eq!(envelope.event_type(), "auth.created");
    assert_eq!(envelope.aggregate_id(), "abc-123");
    assert_eq!(envelope.data(), &json!({"name": "X"}));
    assert_eq!(envelope.metadata(), &json!({}));
    assert!(envelope.occurred_at().is_some());
}

#[tokio::test]
async fn concurrent_publishers_keep_per_aggregate_order() {
    let (broker, publisher) = publisher_with_broker(4).await;

    // One task per aggregate; each publishes its own sequence in order
    let mut tasks = Vec::new();
    for aggregate in ["user-1", "user-2", "user-3", "user-4"] {
        let publisher = publisher.clone();
        tasks.push(tokio::spawn(async move {
            for seq in 0..25u64 {
                let event = NewDomainEvent::new("users.updated", aggregate, json!({"seq": seq}));
                publisher.publish_event(event).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut per_aggregate: HashMap<String, Vec<u64>> = HashMap::new();
    let mut partitions: HashMap<String, i32> = HashMap::new();
    for message in broker.messages() {
        let key = message.key.clone().unwrap();
        let seq = message.json().unwrap()["data"]["seq"].as_u64().unwrap();
        per_aggregate.entry(key.clone()).or_default().push(seq);

        let partition = *partitions.entry(key).or_insert(message.partition);
        assert_eq!(partition, message.partition);
    }

    assert_eq!(per_aggregate.len(), 4);
    for seqs in per_aggregate.values() {
        assert_eq!(seqs, &(0..25).collect::<Vec<u64>>());
    }
}

#[tokio::test]
async fn unknown_topic_error_reaches_caller() {
    let (broker, publisher) = publisher_with_broker(1).await;

    let err = publisher
        .publish("audit-events", vec![boomcard_events::messaging::OutboundMessage::new(json!({}))])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PublishError::Transport(TransportError::Rejected { ref topic, .. })
            if topic == "audit-events"
    ));
    assert!(broker.messages().is_empty());
}
