//! Pluggable search backend port and the registry the index handlers
//! consume it through.
//!
//! Concrete engines (vector stores, keyword engines) live outside the core;
//! they implement [`IndexBackend`] and are registered by name at wiring
//! time. Backends must tolerate concurrent calls from one handler worker;
//! they are not called concurrently for the same backend by different
//! workers.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    /// Canonical record SRN.
    pub srn: String,
    pub score: f64,
    pub metadata: Value,
}

/// Structured query result returned by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub hits: Vec<QueryHit>,
    pub total: usize,
    /// The query string as executed.
    pub query: String,
}

/// Storage backend for record indexing and search.
///
/// Ingestion is upsert-by-SRN: re-ingesting an SRN replaces the previous
/// document, which keeps pipeline retries idempotent.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Unique backend name; also the routing key of its deliveries.
    fn name(&self) -> &str;

    async fn ingest(&self, srn: &str, metadata: &Value) -> Result<()>;

    async fn ingest_batch(&self, records: &[(String, Value)]) -> Result<()>;

    async fn delete(&self, srn: &str) -> Result<()>;

    async fn query(&self, q: &str, limit: usize) -> Result<QueryResult>;

    async fn health(&self) -> bool;

    async fn count(&self) -> Result<usize>;

    /// Make pending writes visible to queries. Default: nothing buffered.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Registry of available backends, frozen after wiring.
#[derive(Clone, Default)]
pub struct IndexRegistry {
    backends: BTreeMap<String, Arc<dyn IndexBackend>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn IndexBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn IndexBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn IndexBackend>)> {
        self.backends.iter().map(|(name, b)| (name.as_str(), b))
    }
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
