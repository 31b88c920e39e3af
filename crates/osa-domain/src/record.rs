//! Record aggregate — the immutable published artifact.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use osa_srn::{DepositionSrn, RecordSrn};

/// Per-backend indexing bookkeeping on a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Identifier assigned by the backend.
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

/// A published record. Immutable after publication; republishing a deposition
/// produces a new record with a fresh SRN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub srn: RecordSrn,
    pub deposition_srn: DepositionSrn,
    pub metadata: Value,
    /// Backend name → index entry. BTreeMap for stable JSON output.
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexEntry>,
    pub published_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        srn: RecordSrn,
        deposition_srn: DepositionSrn,
        metadata: Value,
        published_at: DateTime<Utc>,
    ) -> Self {
        Record {
            srn,
            deposition_srn,
            metadata,
            indexes: BTreeMap::new(),
            published_at,
        }
    }
}
