//! Convention aggregate — an immutable, versioned submission template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use osa_srn::{ConventionSrn, SchemaSrn};

use crate::hook::{HookDefinition, HookSnapshot};

/// Constraints on the files a deposition of this convention may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRequirements {
    /// Accepted file extensions (lowercase, without the dot). Empty = any.
    #[serde(default)]
    pub accepted_types: Vec<String>,
    pub min_count: usize,
    pub max_count: usize,
    /// Per-file size ceiling in bytes.
    pub max_file_size: i64,
}

impl FileRequirements {
    /// `true` when `extension` is admitted by `accepted_types`.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.accepted_types.is_empty()
            || self.accepted_types.iter().any(|t| t == extension)
    }
}

/// Limit applied to the first source run after a convention is deployed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialRun {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// Containerized upstream puller declared by a convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub image: String,
    pub digest: String,
    #[serde(default)]
    pub config: Value,
    /// Cron expression for periodic pulls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_run: Option<InitialRun>,
}

/// An immutable, user-facing submission template.
///
/// Conventions are versioned (SemVer in the SRN) and never mutated after
/// registration; a change ships as a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convention {
    pub srn: ConventionSrn,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema_srn: SchemaSrn,
    pub file_requirements: FileRequirements,
    #[serde(default)]
    pub hooks: Vec<HookDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceDefinition>,
    /// When set, validated depositions wait for a curator instead of being
    /// auto-approved.
    #[serde(default)]
    pub requires_manual_curation: bool,
    pub created_at: DateTime<Utc>,
}

impl Convention {
    /// Compact hook forms for carrying on events.
    pub fn hook_snapshots(&self) -> Vec<HookSnapshot> {
        self.hooks.iter().map(HookSnapshot::of).collect()
    }
}
