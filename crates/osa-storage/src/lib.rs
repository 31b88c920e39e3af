//! Filesystem adapter for deposition files, source staging and hook output.
//!
//! Layout under the node's base directory:
//!
//! ```text
//! depositions/{domain}_{localid}/{filename}
//! sources/{convention_localid}/{run_id}/staging/...
//! sources/{convention_localid}/{run_id}/output/{records.jsonl, session.json}
//! hooks/{domain}_{localid}/{hook_name}/{features.json, result.json}
//! ```
//!
//! All externally supplied filenames pass [`validate_filename`] before they
//! touch a path; anything that could escape its directory is rejected.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::fs;

use osa_domain::deposition::DepositionFile;
use osa_domain::ports::FileStorage;
use osa_srn::{ConventionSrn, DepositionSrn};

/// Reject names that could traverse out of their directory.
///
/// # Errors
/// Fails on empty names, path separators, `.`/`..`, NUL bytes and
/// over-long names.
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(anyhow!("invalid filename length: {name:?}"));
    }
    if name == "." || name == ".." {
        return Err(anyhow!("invalid filename: {name:?}"));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(anyhow!("filename must not contain path separators: {name:?}"));
    }
    Ok(())
}

fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// `{domain}_{localid}` — SRNs contain `:` so the canonical form is not a
/// usable directory name.
fn dir_key(domain: &str, local_id: &str) -> String {
    format!("{domain}_{local_id}")
}

/// Filesystem-backed [`FileStorage`].
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
}

impl LocalFileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        LocalFileStorage {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn deposition_dir(&self, deposition: &DepositionSrn) -> PathBuf {
        self.base_dir
            .join("depositions")
            .join(dir_key(deposition.domain(), deposition.local_id()))
    }

    fn hook_dir(&self, deposition: &DepositionSrn, hook_name: &str) -> PathBuf {
        self.base_dir
            .join("hooks")
            .join(dir_key(deposition.domain(), deposition.local_id()))
            .join(hook_name)
    }

    async fn read_hook_json(
        &self,
        deposition: &DepositionSrn,
        hook_name: &str,
        file: &str,
    ) -> Result<Option<Value>> {
        validate_filename(hook_name)?;
        let path = self.hook_dir(deposition, hook_name).join(file);
        match fs::read(&path).await {
            Ok(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parse hook output {path:?}"))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read hook output {path:?}")),
        }
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save_file(
        &self,
        deposition: &DepositionSrn,
        filename: &str,
        content: &[u8],
        content_type: Option<&str>,
    ) -> Result<DepositionFile> {
        validate_filename(filename)?;
        let dir = self.deposition_dir(deposition);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create_dir_all {dir:?}"))?;

        let path = dir.join(filename);
        fs::write(&path, content)
            .await
            .with_context(|| format!("write deposition file {path:?}"))?;

        Ok(DepositionFile {
            name: filename.to_string(),
            size: content.len() as i64,
            checksum: sha256_hex(content),
            uploaded_at: Utc::now(),
            content_type: content_type.map(str::to_string),
        })
    }

    async fn read_file(&self, deposition: &DepositionSrn, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;
        let path = self.deposition_dir(deposition).join(filename);
        fs::read(&path)
            .await
            .with_context(|| format!("read deposition file {path:?}"))
    }

    async fn delete_file(&self, deposition: &DepositionSrn, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        let path = self.deposition_dir(deposition).join(filename);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Idempotent: deleting a missing file is a no-op.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove deposition file {path:?}")),
        }
    }

    async fn delete_all_files(&self, deposition: &DepositionSrn) -> Result<()> {
        let dir = self.deposition_dir(deposition);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove deposition dir {dir:?}")),
        }
    }

    fn files_dir(&self, deposition: &DepositionSrn) -> PathBuf {
        self.deposition_dir(deposition)
    }

    fn staging_dir(&self, convention: &ConventionSrn, run_id: &str) -> PathBuf {
        self.base_dir
            .join("sources")
            .join(convention.local_id())
            .join(run_id)
            .join("staging")
    }

    fn output_dir(&self, convention: &ConventionSrn, run_id: &str) -> PathBuf {
        self.base_dir
            .join("sources")
            .join(convention.local_id())
            .join(run_id)
            .join("output")
    }

    fn hook_output_dir(&self, deposition: &DepositionSrn, hook_name: &str) -> PathBuf {
        self.hook_dir(deposition, hook_name)
    }

    async fn move_staged_files(
        &self,
        staging_dir: &Path,
        file_paths: &[String],
        deposition: &DepositionSrn,
    ) -> Result<Vec<DepositionFile>> {
        let mut moved = Vec::with_capacity(file_paths.len());
        for name in file_paths {
            validate_filename(name)?;
            let src = staging_dir.join(name);
            let content = fs::read(&src)
                .await
                .with_context(|| format!("read staged file {src:?}"))?;
            let file = self.save_file(deposition, name, &content, None).await?;
            fs::remove_file(&src)
                .await
                .with_context(|| format!("remove staged file {src:?}"))?;
            moved.push(file);
        }
        Ok(moved)
    }

    async fn hook_features_exist(
        &self,
        deposition: &DepositionSrn,
        hook_name: &str,
    ) -> Result<bool> {
        validate_filename(hook_name)?;
        let path = self.hook_dir(deposition, hook_name).join("features.json");
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn read_hook_features(
        &self,
        deposition: &DepositionSrn,
        hook_name: &str,
    ) -> Result<Vec<Map<String, Value>>> {
        let value = match self.read_hook_json(deposition, hook_name, "features.json").await? {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        let rows = value
            .as_array()
            .ok_or_else(|| anyhow!("features.json for hook '{hook_name}' is not an array"))?;
        rows.iter()
            .map(|row| {
                row.as_object().cloned().ok_or_else(|| {
                    anyhow!("features.json for hook '{hook_name}' contains a non-object row")
                })
            })
            .collect()
    }

    async fn read_hook_result(
        &self,
        deposition: &DepositionSrn,
        hook_name: &str,
    ) -> Result<Option<Value>> {
        self.read_hook_json(deposition, hook_name, "result.json").await
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
