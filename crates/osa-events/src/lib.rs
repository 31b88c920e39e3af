//! Event system vocabulary: envelopes, typed events, deliveries, handler
//! contracts, the subscription registry and the transactional Outbox.
//!
//! The delivery model is multi-consumer: appending an event writes one row to
//! the append-only event log plus one delivery row per subscribed consumer
//! group. Workers claim deliveries for their group, process them through an
//! [`EventHandler`], and acknowledge each delivery independently — so one
//! slow or failing consumer never blocks the others.

pub mod delivery;
pub mod envelope;
pub mod events;
pub mod handler;
pub mod outbox;
pub mod registry;
pub mod schedule;
pub mod subscription;
pub mod worker_config;

pub use delivery::{ClaimResult, ClaimedEvent, DeliveryStatus};
pub use envelope::{DomainEvent, EventEnvelope};
pub use events::{
    register_all, ConventionReady, ConventionRegistered, DepositionApproved, DepositionCreated,
    DepositionSubmitted, FileDeleted, FileUploaded, IndexRecord, MetadataUpdated, RecordPublished,
    ServerStarted, SourceRecordReady, SourceRequested, SourceRunCompleted, ValidationCompleted,
    ValidationFailed, ValidationStatus,
};
pub use handler::{EventHandler, HandlerError, HandlerResult, Handles, TypedHandler};
pub use outbox::{ChangefeedQuery, EventRepository, Outbox};
pub use registry::EventTypeRegistry;
pub use schedule::Schedule;
pub use subscription::SubscriptionRegistry;
pub use worker_config::{ConfigError, WorkerConfig, WorkerState, WorkerStatus};
