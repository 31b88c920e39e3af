//! Index domain: fan-out of published records to the search backends and
//! the per-backend ingestion handlers.
//!
//! Fan-out creates one `IndexRecord` event per registered backend, routed
//! by backend name, so each backend has independent retry and failure
//! isolation. The vector handler batches for efficient embedding
//! generation; keyword ingestion gains nothing from batching and runs
//! per event.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use osa_domain::identity::{AuthPolicy, Identity};
use osa_events::events::{IndexRecord, RecordPublished, SourceRunCompleted};
use osa_events::handler::{HandlerError, HandlerResult, Handles};
use osa_events::outbox::Outbox;
use osa_events::worker_config::WorkerConfig;
use osa_events::DomainEvent;
use osa_index::IndexRegistry;

pub const VECTOR_BACKEND: &str = "vector";
pub const KEYWORD_BACKEND: &str = "keyword";

// ---------------------------------------------------------------------------
// FanOutToIndexBackends
// ---------------------------------------------------------------------------

/// Handles `RecordPublished`: one `IndexRecord` per registered backend,
/// with the delivery routing key set to the backend name.
pub struct FanOutToIndexBackends {
    pub indexes: IndexRegistry,
    pub outbox: Arc<Outbox>,
}

impl FanOutToIndexBackends {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("FanOutToIndexBackends", RecordPublished::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<RecordPublished> for FanOutToIndexBackends {
    async fn handle(&self, event: RecordPublished) -> HandlerResult {
        let backends = self.indexes.names();
        debug!(record = %event.record_srn, backends = backends.len(), "index fan-out");

        for backend_name in backends {
            self.outbox
                .append_routed(
                    &IndexRecord {
                        id: Uuid::new_v4(),
                        backend_name: backend_name.clone(),
                        record_srn: event.record_srn.clone(),
                        metadata: event.metadata.clone(),
                    },
                    Some(&backend_name),
                )
                .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// VectorIndexHandler
// ---------------------------------------------------------------------------

/// Batched ingestion into the vector backend (`routing_key = "vector"`).
pub struct VectorIndexHandler {
    pub indexes: IndexRegistry,
}

impl VectorIndexHandler {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("VectorIndexHandler", IndexRecord::EVENT_TYPE)
            .with_routing_key(VECTOR_BACKEND)
            .with_batch(100, Duration::from_secs(5))
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<IndexRecord> for VectorIndexHandler {
    async fn handle(&self, event: IndexRecord) -> HandlerResult {
        self.handle_batch(vec![event]).await
    }

    async fn handle_batch(&self, events: Vec<IndexRecord>) -> HandlerResult {
        if events.is_empty() {
            return Ok(());
        }

        let backend = match self.indexes.get(VECTOR_BACKEND) {
            Some(backend) => backend,
            None => {
                return Err(HandlerError::skipped(
                    events.iter().map(|e| e.id).collect(),
                    "vector backend not available",
                ));
            }
        };

        let records: Vec<(String, serde_json::Value)> = events
            .iter()
            .map(|e| (e.record_srn.render(), e.metadata.clone()))
            .collect();

        debug!(batch = records.len(), "vector ingest");
        backend.ingest_batch(&records).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// KeywordIndexHandler
// ---------------------------------------------------------------------------

/// Single-event ingestion into the keyword backend
/// (`routing_key = "keyword"`).
pub struct KeywordIndexHandler {
    pub indexes: IndexRegistry,
}

impl KeywordIndexHandler {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("KeywordIndexHandler", IndexRecord::EVENT_TYPE)
            .with_routing_key(KEYWORD_BACKEND)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<IndexRecord> for KeywordIndexHandler {
    async fn handle(&self, event: IndexRecord) -> HandlerResult {
        let backend = match self.indexes.get(KEYWORD_BACKEND) {
            Some(backend) => backend,
            None => {
                return Err(HandlerError::skipped(
                    vec![event.id],
                    "keyword backend not available",
                ));
            }
        };
        backend.ingest(&event.record_srn.render(), &event.metadata).await?;
        debug!(record = %event.record_srn, "keyword ingest");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FlushIndexesOnSourceComplete
// ---------------------------------------------------------------------------

/// Handles `SourceRunCompleted`: after the final chunk of a source run,
/// flush every backend so bulk-ingested records become searchable together.
pub struct FlushIndexesOnSourceComplete {
    pub indexes: IndexRegistry,
}

impl FlushIndexesOnSourceComplete {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("FlushIndexesOnSourceComplete", SourceRunCompleted::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<SourceRunCompleted> for FlushIndexesOnSourceComplete {
    async fn handle(&self, event: SourceRunCompleted) -> HandlerResult {
        if !event.is_final_chunk {
            return Ok(());
        }
        for (name, backend) in self.indexes.iter() {
            backend.flush().await?;
            debug!(backend = name, "index flushed");
        }
        info!(convention = %event.convention_srn, "indexes flushed after source run");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IndexService
// ---------------------------------------------------------------------------

/// Query-side operations over the registry (health, counts). Ingestion is
/// event-driven through the handlers above.
pub struct IndexService {
    pub indexes: IndexRegistry,
}

impl IndexService {
    pub fn new(indexes: IndexRegistry) -> Self {
        IndexService { indexes }
    }

    pub async fn count(&self, backend_name: &str) -> Result<Option<usize>> {
        match self.indexes.get(backend_name) {
            Some(backend) => Ok(Some(backend.count().await?)),
            None => Ok(None),
        }
    }

    pub async fn health(&self, backend_name: &str) -> Option<bool> {
        match self.indexes.get(backend_name) {
            Some(backend) => Some(backend.health().await),
            None => None,
        }
    }
}
