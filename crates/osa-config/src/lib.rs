//! Node configuration: YAML file plus environment overrides.
//!
//! The canonical JSON form of the effective configuration is hashed so the
//! running config can be identified in logs and status output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const ENV_NODE_DOMAIN: &str = "OSA_NODE_DOMAIN";
pub const ENV_DATA_DIR: &str = "OSA_DATA_DIR";
pub const ENV_HTTP_ADDR: &str = "OSA_HTTP_ADDR";

/// One cron-driven source pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceScheduleConfig {
    pub id: String,
    /// Cron expression (seconds-resolution, e.g. `"0 0 3 * * * *"`).
    pub cron: String,
    /// Convention SRN whose source is pulled.
    pub convention: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// Effective node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// DNS name identifying this node; the domain segment of every SRN it
    /// mints.
    pub node_domain: String,
    /// Base directory for deposition files, source staging and hook output.
    pub data_dir: PathBuf,
    /// Bind address of the HTTP surface.
    pub http_addr: String,
    /// Janitor period for stale-claim resets; 0 disables the janitor.
    pub stale_claim_interval_seconds: u64,
    /// Grace period for worker shutdown.
    pub shutdown_timeout_seconds: u64,
    /// Cron-driven source pulls.
    pub schedules: Vec<SourceScheduleConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_domain: "localhost".to_string(),
            data_dir: PathBuf::from("./data"),
            http_addr: "127.0.0.1:8484".to_string(),
            stale_claim_interval_seconds: 60,
            shutdown_timeout_seconds: 30,
            schedules: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read config {path:?}"))?;
                serde_yaml::from_str(&raw).with_context(|| format!("parse config {path:?}"))?
            }
            None => NodeConfig::default(),
        };

        if let Ok(domain) = std::env::var(ENV_NODE_DOMAIN) {
            config.node_domain = domain;
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var(ENV_HTTP_ADDR) {
            config.http_addr = addr;
        }
        Ok(config)
    }

    /// Startup validation: misconfiguration is a boot error, never a
    /// runtime one.
    ///
    /// # Errors
    /// The first empty node domain, duplicate schedule id, or empty
    /// schedule field. (Cron-expression and SRN parsing are validated by
    /// the scheduler wiring, which owns those types.)
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.node_domain.trim().is_empty(), "node_domain must be set");
        anyhow::ensure!(!self.http_addr.trim().is_empty(), "http_addr must be set");

        let mut seen = std::collections::BTreeSet::new();
        for schedule in &self.schedules {
            anyhow::ensure!(!schedule.id.trim().is_empty(), "schedule id must not be empty");
            anyhow::ensure!(
                seen.insert(schedule.id.clone()),
                "duplicate schedule id: '{}'",
                schedule.id
            );
            anyhow::ensure!(
                !schedule.cron.trim().is_empty(),
                "schedule '{}' has an empty cron expression",
                schedule.id
            );
            anyhow::ensure!(
                !schedule.convention.trim().is_empty(),
                "schedule '{}' names no convention",
                schedule.id
            );
        }
        Ok(())
    }

    /// SHA-256 over the canonical (key-sorted, compact) JSON form.
    pub fn config_hash(&self) -> Result<String> {
        let value = serde_json::to_value(self).context("serialize config")?;
        let canonical = canonicalize_json(&value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
