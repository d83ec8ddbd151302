//! In-memory broker for tests and local development

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::transport::{DeliveryReport, Transport, TransportError, WireMessage};

const DEFAULT_PARTITIONS: i32 = 3;

/// A message the fake broker accepted
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    pub timestamp_ms: i64,
}

impl CapturedMessage {
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Default)]
struct BrokerState {
    log: Vec<CapturedMessage>,
    next_offsets: HashMap<(String, i32), i64>,
    fail_next: Option<String>,
}

/// `Transport` that keeps everything in process.
///
/// Keyed messages are routed to `fnv1a(key) % partitions`, so all messages
/// for one key share a partition and keep their relative order. A rejected
/// batch leaves no trace in the log.
pub struct InMemoryTransport {
    partitions: i32,
    known_topics: Option<HashSet<String>>,
    connected: AtomicBool,
    unavailable: AtomicBool,
    round_robin: AtomicUsize,
    state: Mutex<BrokerState>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            partitions: partitions.max(1),
            known_topics: None,
            connected: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            round_robin: AtomicUsize::new(0),
            state: Mutex::new(BrokerState::default()),
        }
    }

    /// Reject sends to any topic outside `topics`
    pub fn with_known_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    /// Reject the next batch with `reason`
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.lock().fail_next = Some(reason.into());
    }

    /// Reject every batch until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Every accepted message, in acceptance order
    pub fn messages(&self) -> Vec<CapturedMessage> {
        self.lock().log.clone()
    }

    pub fn messages_for(&self, topic: &str) -> Vec<CapturedMessage> {
        self.lock()
            .log
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn partition_for(&self, key: &str) -> i32 {
        (fnv1a(key.as_bytes()) % self.partitions as u64) as i32
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        // A panic while holding the lock only happens inside a failing test;
        // the log is still usable afterwards.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route(&self, key: Option<&str>) -> i32 {
        match key {
            Some(key) => self.partition_for(key),
            None => {
                let next = self.round_robin.fetch_add(1, Ordering::SeqCst);
                (next % self.partitions as usize) as i32
            }
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        messages: Vec<WireMessage>,
    ) -> Result<Vec<DeliveryReport>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let rejected = |reason: String| TransportError::Rejected {
            topic: topic.to_string(),
            reason,
        };

        let mut state = self.lock();
        if let Some(reason) = state.fail_next.take() {
            return Err(rejected(reason));
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(rejected("broker unavailable".to_string()));
        }
        if let Some(known) = &self.known_topics {
            if !known.contains(topic) {
                return Err(rejected("unknown topic or partition".to_string()));
            }
        }

        let mut reports = Vec::with_capacity(messages.len());
        for message in messages {
            let partition = self.route(message.key.as_deref());
            let next = state
                .next_offsets
                .entry((topic.to_string(), partition))
                .or_insert(0);
            let offset = *next;
            *next += 1;

            state.log.push(CapturedMessage {
                topic: topic.to_string(),
                partition,
                offset,
                key: message.key,
                payload: message.payload,
                headers: message.headers,
                timestamp_ms: message.timestamp_ms,
            });
            reports.push(DeliveryReport {
                topic: topic.to_string(),
                partition,
                offset,
            });
        }
        Ok(reports)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}
