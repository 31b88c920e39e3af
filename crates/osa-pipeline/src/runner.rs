//! Container runner port.
//!
//! Sources and hooks are both OCI containers; the archive invokes them
//! through this port and never talks to a container runtime directly.
//! Adapter implementations (docker, podman) live outside the core.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use osa_domain::convention::SourceDefinition;
use osa_domain::hook::HookSnapshot;

/// Image reference plus configuration for one container invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub digest: String,
    pub config: Value,
}

impl ContainerSpec {
    pub fn for_source(source: &SourceDefinition) -> Self {
        ContainerSpec {
            image: source.image.clone(),
            digest: source.digest.clone(),
            config: source.config.clone(),
        }
    }

    pub fn for_hook(hook: &HookSnapshot) -> Self {
        ContainerSpec {
            image: hook.image.clone(),
            digest: hook.digest.clone(),
            config: hook.config.clone(),
        }
    }
}

/// Inputs handed to the container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerInputs {
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
    /// Opaque pagination state returned by the previous chunk's run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
}

/// One record produced by a source container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub metadata: Value,
    /// Filenames relative to the run's staging directory.
    #[serde(default)]
    pub file_paths: Vec<String>,
}

/// Output of one container invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerOutput {
    #[serde(default)]
    pub records: Vec<SourceRecord>,
    /// Present when more data is available; feed back via
    /// [`RunnerInputs::session`] to continue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
}

/// Invoke a source or hook container.
///
/// `files_dir` is where the container reads/writes payload files (staging
/// dir for sources, the deposition's files dir for hooks); `work_dir`
/// receives run artifacts (`records.jsonl`, `session.json`, hook
/// `features.json` / `result.json`).
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn run(
        &self,
        spec: &ContainerSpec,
        inputs: &RunnerInputs,
        files_dir: &Path,
        work_dir: &Path,
    ) -> Result<RunnerOutput>;
}
