//! Recording index backend: upsert-by-SRN in memory, with call counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use osa_index::{IndexBackend, QueryHit, QueryResult};

pub struct RecordingIndexBackend {
    name: String,
    documents: Mutex<BTreeMap<String, Value>>,
    ingest_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    flush_calls: AtomicUsize,
    healthy: AtomicBool,
}

impl RecordingIndexBackend {
    pub fn new(name: &str) -> Self {
        RecordingIndexBackend {
            name: name.to_string(),
            documents: Mutex::new(BTreeMap::new()),
            ingest_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            flush_calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn ingest_calls(&self) -> usize {
        self.ingest_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }

    pub fn documents(&self) -> BTreeMap<String, Value> {
        self.documents.lock().expect("lock").clone()
    }
}

#[async_trait]
impl IndexBackend for RecordingIndexBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ingest(&self, srn: &str, metadata: &Value) -> Result<()> {
        self.ingest_calls.fetch_add(1, Ordering::SeqCst);
        self.documents
            .lock()
            .expect("lock")
            .insert(srn.to_string(), metadata.clone());
        Ok(())
    }

    async fn ingest_batch(&self, records: &[(String, Value)]) -> Result<()> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut documents = self.documents.lock().expect("lock");
        for (srn, metadata) in records {
            documents.insert(srn.clone(), metadata.clone());
        }
        Ok(())
    }

    async fn delete(&self, srn: &str) -> Result<()> {
        self.documents.lock().expect("lock").remove(srn);
        Ok(())
    }

    async fn query(&self, q: &str, limit: usize) -> Result<QueryResult> {
        let documents = self.documents.lock().expect("lock");
        let hits: Vec<QueryHit> = documents
            .iter()
            .filter(|(srn, metadata)| {
                srn.contains(q) || metadata.to_string().to_lowercase().contains(&q.to_lowercase())
            })
            .take(limit)
            .map(|(srn, metadata)| QueryHit {
                srn: srn.clone(),
                score: 1.0,
                metadata: metadata.clone(),
            })
            .collect();
        let total = hits.len();
        Ok(QueryResult {
            hits,
            total,
            query: q.to_string(),
        })
    }

    async fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.documents.lock().expect("lock").len())
    }

    async fn flush(&self) -> Result<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
