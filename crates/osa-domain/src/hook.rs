//! Hook and feature-schema value objects.
//!
//! A hook is a containerized validator / feature extractor declared by a
//! convention. The full [`HookDefinition`] lives on the convention; events
//! carry the compact [`HookSnapshot`] so downstream handlers can operate
//! without reloading the convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use osa_srn::SchemaSrn;

/// Container runtime used to execute a hook or source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Docker,
    Podman,
}

/// Resource ceilings applied to a hook container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// How many feature rows a hook produces per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookCardinality {
    One,
    Many,
}

/// Column type in a hook's feature schema. Maps one-to-one onto the SQL
/// column types of the generated feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Json,
    Timestamp,
}

/// One column of a hook's feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
}

/// Declared shape of the feature rows a hook emits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub columns: Vec<FeatureColumn>,
}

/// Manifest shipped with a hook image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookManifest {
    /// Hook name; also names the generated feature table.
    pub name: String,
    /// Record schema the hook targets.
    pub target_schema: SchemaSrn,
    pub cardinality: HookCardinality,
    pub feature_schema: FeatureSchema,
}

/// Full hook declaration as stored on a convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDefinition {
    pub image: String,
    pub digest: String,
    pub runner: RunnerKind,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub limits: ResourceLimits,
    pub manifest: HookManifest,
}

/// Compact hook form carried on events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSnapshot {
    pub name: String,
    pub image: String,
    pub digest: String,
    pub features: Vec<FeatureColumn>,
    #[serde(default)]
    pub config: Value,
}

impl HookSnapshot {
    pub fn of(hook: &HookDefinition) -> Self {
        HookSnapshot {
            name: hook.manifest.name.clone(),
            image: hook.image.clone(),
            digest: hook.digest.clone(),
            features: hook.manifest.feature_schema.columns.clone(),
            config: hook.config.clone(),
        }
    }
}
