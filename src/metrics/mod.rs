// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Entity writes at the CRUD call sites (created / updated / deleted)
// - Domain event publishing (throughput, failures, latency)
//
// Publish success and the entity counters are recorded independently; a
// committed write whose event failed to publish is still not counted.
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the service
pub struct Metrics {
    registry: Registry,

    // Call-site counters
    pub entity_operations: IntCounterVec,

    // Publisher metrics
    pub events_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub publish_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let entity_operations = IntCounterVec::new(
            Opts::new("entity_operations_total", "Committed entity writes"),
            &["entity", "operation"],
        )?;
        registry.register(Box::new(entity_operations.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Messages acknowledged by the broker"),
            &["topic"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("event_publish_failures_total", "Batches the transport failed to send"),
            &["topic"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new(
                "event_publish_duration_seconds",
                "Time from send to broker acknowledgment",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["topic"],
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        Ok(Self {
            registry,
            entity_operations,
            events_published,
            publish_failures,
            publish_duration,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Call-site counter, e.g. ("auth", "created")
    pub fn record_entity_operation(&self, entity: &str, operation: &str) {
        self.entity_operations.with_label_values(&[entity, operation]).inc();
    }

    pub fn record_publish(&self, topic: &str, messages: usize, duration_secs: f64, success: bool) {
        if success {
            self.events_published
                .with_label_values(&[topic])
                .inc_by(messages as u64);
        } else {
            self.publish_failures.with_label_values(&[topic]).inc();
        }
        self.publish_duration.with_label_values(&[topic]).observe(duration_secs);
    }
}
