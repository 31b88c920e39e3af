//! In-memory aggregate repositories and feature store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use osa_domain::convention::Convention;
use osa_domain::deposition::Deposition;
use osa_domain::hook::FeatureColumn;
use osa_domain::ports::{
    ConventionRepository, DepositionRepository, FeatureStore, RecordRepository,
};
use osa_domain::record::Record;
use osa_srn::{ConventionSrn, DepositionSrn, RecordSrn};

#[derive(Default)]
pub struct MemoryDepositionRepository {
    items: Mutex<BTreeMap<String, Deposition>>,
}

impl MemoryDepositionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DepositionRepository for MemoryDepositionRepository {
    async fn save(&self, deposition: &Deposition) -> Result<()> {
        self.items
            .lock()
            .expect("lock")
            .insert(deposition.srn.render(), deposition.clone());
        Ok(())
    }

    async fn get(&self, srn: &DepositionSrn) -> Result<Option<Deposition>> {
        Ok(self.items.lock().expect("lock").get(&srn.render()).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Deposition>> {
        Ok(self
            .items
            .lock()
            .expect("lock")
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Deposition>> {
        Ok(self
            .items
            .lock()
            .expect("lock")
            .values()
            .filter(|d| d.owner_id == owner_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.items.lock().expect("lock").len() as i64)
    }

    async fn count_by_owner(&self, owner_id: &str) -> Result<i64> {
        Ok(self
            .items
            .lock()
            .expect("lock")
            .values()
            .filter(|d| d.owner_id == owner_id)
            .count() as i64)
    }
}

#[derive(Default)]
pub struct MemoryConventionRepository {
    items: Mutex<BTreeMap<String, Convention>>,
}

impl MemoryConventionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a convention without going through the service.
    pub fn insert(&self, convention: Convention) {
        self.items
            .lock()
            .expect("lock")
            .insert(convention.srn.render(), convention);
    }
}

#[async_trait]
impl ConventionRepository for MemoryConventionRepository {
    async fn save(&self, convention: &Convention) -> Result<()> {
        let mut items = self.items.lock().expect("lock");
        let key = convention.srn.render();
        anyhow::ensure!(
            !items.contains_key(&key),
            "convention already registered: {key}"
        );
        items.insert(key, convention.clone());
        Ok(())
    }

    async fn get(&self, srn: &ConventionSrn) -> Result<Option<Convention>> {
        Ok(self.items.lock().expect("lock").get(&srn.render()).cloned())
    }

    async fn list(&self) -> Result<Vec<Convention>> {
        Ok(self.items.lock().expect("lock").values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryRecordRepository {
    items: Mutex<BTreeMap<String, Record>>,
}

impl MemoryRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Record> {
        self.items.lock().expect("lock").values().cloned().collect()
    }
}

#[async_trait]
impl RecordRepository for MemoryRecordRepository {
    async fn save(&self, record: &Record) -> Result<()> {
        let mut items = self.items.lock().expect("lock");
        let key = record.srn.render();
        anyhow::ensure!(!items.contains_key(&key), "record already exists: {key}");
        items.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, srn: &RecordSrn) -> Result<Option<Record>> {
        Ok(self.items.lock().expect("lock").get(&srn.render()).cloned())
    }

    async fn list_by_deposition(&self, srn: &DepositionSrn) -> Result<Vec<Record>> {
        let target = srn.render();
        Ok(self
            .items
            .lock()
            .expect("lock")
            .values()
            .filter(|r| r.deposition_srn.render() == target)
            .cloned()
            .collect())
    }
}

/// Records DDL and inserted rows instead of executing them.
#[derive(Default)]
pub struct MemoryFeatureStore {
    tables: Mutex<BTreeMap<String, Vec<FeatureColumn>>>,
    rows: Mutex<Vec<(String, String, Map<String, Value>)>>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.lock().expect("lock").keys().cloned().collect()
    }

    /// `(hook_name, record_srn, row)` triples in insertion order.
    pub fn inserted_rows(&self) -> Vec<(String, String, Map<String, Value>)> {
        self.rows.lock().expect("lock").clone()
    }
}

#[async_trait]
impl FeatureStore for MemoryFeatureStore {
    async fn create_table(&self, hook_name: &str, columns: &[FeatureColumn]) -> Result<()> {
        self.tables
            .lock()
            .expect("lock")
            .insert(hook_name.to_string(), columns.to_vec());
        Ok(())
    }

    async fn insert_features(
        &self,
        hook_name: &str,
        _columns: &[FeatureColumn],
        record_srn: &RecordSrn,
        rows: &[Map<String, Value>],
    ) -> Result<u64> {
        let mut stored = self.rows.lock().expect("lock");
        for row in rows {
            stored.push((hook_name.to_string(), record_srn.render(), row.clone()));
        }
        Ok(rows.len() as u64)
    }
}
