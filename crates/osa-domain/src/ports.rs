//! Repository and storage ports.
//!
//! Adapters live in `osa-db` (Postgres) and `osa-storage` (filesystem);
//! test doubles in `osa-testkit`. All ports are object-safe so services can
//! hold `Arc<dyn ...>` handles bound to the current unit of work.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use osa_srn::{ConventionSrn, DepositionSrn, RecordSrn};

use crate::convention::Convention;
use crate::deposition::{Deposition, DepositionFile};
use crate::hook::FeatureColumn;
use crate::record::Record;

/// Persistence for [`Deposition`] aggregates.
#[async_trait]
pub trait DepositionRepository: Send + Sync {
    /// Insert or update by SRN.
    async fn save(&self, deposition: &Deposition) -> Result<()>;

    async fn get(&self, srn: &DepositionSrn) -> Result<Option<Deposition>>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Deposition>>;

    async fn list_by_owner(&self, owner_id: &str, limit: i64, offset: i64)
        -> Result<Vec<Deposition>>;

    async fn count(&self) -> Result<i64>;

    async fn count_by_owner(&self, owner_id: &str) -> Result<i64>;
}

/// Persistence for [`Convention`] aggregates. Conventions are insert-only.
#[async_trait]
pub trait ConventionRepository: Send + Sync {
    async fn save(&self, convention: &Convention) -> Result<()>;

    async fn get(&self, srn: &ConventionSrn) -> Result<Option<Convention>>;

    async fn list(&self) -> Result<Vec<Convention>>;
}

/// Persistence for published [`Record`]s. Records are insert-only.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn save(&self, record: &Record) -> Result<()>;

    async fn get(&self, srn: &RecordSrn) -> Result<Option<Record>>;

    async fn list_by_deposition(&self, srn: &DepositionSrn) -> Result<Vec<Record>>;
}

/// Storage for hook feature rows: one table per hook, created from the
/// hook's declared column schema.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Create the feature table for a hook if it does not exist yet.
    async fn create_table(&self, hook_name: &str, columns: &[FeatureColumn]) -> Result<()>;

    /// Insert one row per entry, keyed by `record_srn`. `columns` is the
    /// hook's declared schema (from its snapshot); values are bound by the
    /// declared type. Returns the number of rows written.
    async fn insert_features(
        &self,
        hook_name: &str,
        columns: &[FeatureColumn],
        record_srn: &RecordSrn,
        rows: &[Map<String, Value>],
    ) -> Result<u64>;
}

/// Filesystem boundary for deposition files, source staging and hook output.
///
/// Layout under the node's base directory:
///
/// ```text
/// depositions/{domain}_{localid}/{filename}
/// sources/{convention_localid}/{run_id}/staging/...
/// sources/{convention_localid}/{run_id}/output/...
/// hooks/{deposition_srn}/{hook_name}/features.json
/// ```
///
/// Implementations MUST reject filenames that escape their directory.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Persist file content and return its metadata (size, sha-256).
    async fn save_file(
        &self,
        deposition: &DepositionSrn,
        filename: &str,
        content: &[u8],
        content_type: Option<&str>,
    ) -> Result<DepositionFile>;

    /// Read a stored file back in full.
    async fn read_file(&self, deposition: &DepositionSrn, filename: &str) -> Result<Vec<u8>>;

    async fn delete_file(&self, deposition: &DepositionSrn, filename: &str) -> Result<()>;

    async fn delete_all_files(&self, deposition: &DepositionSrn) -> Result<()>;

    /// Canonical directory holding a deposition's files.
    fn files_dir(&self, deposition: &DepositionSrn) -> PathBuf;

    /// Staging directory for files produced by a source run.
    fn staging_dir(&self, convention: &ConventionSrn, run_id: &str) -> PathBuf;

    /// Output directory for a source run (`records.jsonl`, `session.json`).
    fn output_dir(&self, convention: &ConventionSrn, run_id: &str) -> PathBuf;

    /// Durable output directory for one hook's results.
    fn hook_output_dir(&self, deposition: &DepositionSrn, hook_name: &str) -> PathBuf;

    /// Move a source record's staged files into the deposition's canonical
    /// file directory, returning their metadata.
    async fn move_staged_files(
        &self,
        staging_dir: &Path,
        file_paths: &[String],
        deposition: &DepositionSrn,
    ) -> Result<Vec<DepositionFile>>;

    /// Whether the hook wrote a `features.json` for this deposition.
    async fn hook_features_exist(&self, deposition: &DepositionSrn, hook_name: &str) -> Result<bool>;

    /// Read the feature rows a hook produced for this deposition.
    async fn read_hook_features(
        &self,
        deposition: &DepositionSrn,
        hook_name: &str,
    ) -> Result<Vec<Map<String, Value>>>;

    /// Read the verdict document a hook wrote, if any (`result.json`).
    async fn read_hook_result(
        &self,
        deposition: &DepositionSrn,
        hook_name: &str,
    ) -> Result<Option<Value>>;
}
