//! Domain event publishing for the BoomCard services.
//!
//! CRUD services commit a write, then announce it on the `domain-events`
//! Kafka topic through [`messaging::EventPublisher`]. The announcement is
//! not transactional with the write: see [`services::EntityService`].

pub mod config;
pub mod events;
pub mod messaging;
pub mod metrics;
pub mod services;
