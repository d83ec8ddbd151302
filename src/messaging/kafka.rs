use async_trait::async_trait;
use futures_util::future::join_all;
use rdkafka::{
    config::ClientConfig,
    error::KafkaError,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::transport::{DeliveryReport, Transport, TransportError, WireMessage};
use crate::config::KafkaConfig;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Kafka transport backed by librdkafka's `FutureProducer`.
///
/// Delivery timeouts, retries and batching are left at librdkafka defaults.
pub struct KafkaTransport {
    producer: FutureProducer,
    brokers: String,
    connected: AtomicBool,
}

impl KafkaTransport {
    /// Build the producer. No network I/O happens until `connect`.
    pub fn new(config: &KafkaConfig) -> Result<Self, TransportError> {
        let producer: FutureProducer = client_config(config).create()?;

        Ok(Self {
            producer,
            brokers: config.bootstrap_servers(),
            connected: AtomicBool::new(false),
        })
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("client.id", &config.client_id)
        .set("security.protocol", config.security_protocol())
        // Publishing to a missing topic must fail rather than create it
        .set("allow.auto.create.topics", "false");

    if let Some(sasl) = &config.sasl {
        client
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", &sasl.username)
            .set("sasl.password", &sasl.password);
    }
    client
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // fetch_metadata blocks the calling thread
        let producer = self.producer.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(METADATA_TIMEOUT))
                .map(|m| m.brokers().len())
        })
        .await
        .map_err(|_| TransportError::Kafka(KafkaError::Canceled))??;

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            brokers = %self.brokers,
            live_brokers = metadata,
            "Kafka producer connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer.flush(Timeout::After(SHUTDOWN_FLUSH_TIMEOUT))
        })
        .await
        .map_err(|_| TransportError::Kafka(KafkaError::Canceled))??;

        tracing::info!(brokers = %self.brokers, "Kafka producer disconnected");
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        messages: Vec<WireMessage>,
    ) -> Result<Vec<DeliveryReport>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        // Enqueue the whole batch first, then wait for every acknowledgment.
        // `messages` outlives the futures, so records can borrow from it.
        let deliveries = messages.iter().map(|message| {
            let mut headers = OwnedHeaders::new_with_capacity(message.headers.len());
            for (name, value) in &message.headers {
                headers = headers.insert(Header {
                    key: name.as_str(),
                    value: Some(value.as_str()),
                });
            }

            let mut record = FutureRecord::<str, [u8]>::to(topic)
                .payload(message.payload.as_slice())
                .headers(headers)
                .timestamp(message.timestamp_ms);
            if let Some(key) = &message.key {
                record = record.key(key.as_str());
            }

            self.producer.send(record, Timeout::Never)
        });

        let mut reports = Vec::with_capacity(messages.len());
        for result in join_all(deliveries).await {
            let delivery = result.map_err(|(e, _)| e)?;
            reports.push(DeliveryReport {
                topic: topic.to_string(),
                partition: delivery.partition,
                offset: delivery.offset,
            });
        }
        Ok(reports)
    }
}
