//! Deposition aggregate.
//!
//! # State diagram
//!
//! ```text
//!            submit()                accept()
//!   Draft ─────────────► InValidation ───────► Accepted (terminal)
//!     ▲                      │      │
//!     │   return_to_draft()  │      │ reject()
//!     └──────────────────────┘      ▼
//!                                Rejected (terminal)
//! ```
//!
//! File mutation and metadata updates are legal only in `Draft`. Illegal
//! transitions return [`DepositionError`]; callers MUST treat them as a bug
//! in the calling command, not retry them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use osa_srn::{ConventionSrn, DepositionSrn, RecordSrn};

// ---------------------------------------------------------------------------
// DepositionStatus
// ---------------------------------------------------------------------------

/// Lifecycle states of a deposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositionStatus {
    Draft,
    InValidation,
    Accepted,
    Rejected,
}

impl DepositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositionStatus::Draft => "draft",
            DepositionStatus::InValidation => "in_validation",
            DepositionStatus::Accepted => "accepted",
            DepositionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DepositionError> {
        match s {
            "draft" => Ok(DepositionStatus::Draft),
            "in_validation" => Ok(DepositionStatus::InValidation),
            "accepted" => Ok(DepositionStatus::Accepted),
            "rejected" => Ok(DepositionStatus::Rejected),
            other => Err(DepositionError::UnknownStatus(other.to_string())),
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositionStatus::Accepted | DepositionStatus::Rejected)
    }
}

// ---------------------------------------------------------------------------
// DepositionError
// ---------------------------------------------------------------------------

/// Returned when an operation is illegal in the deposition's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositionError {
    /// Operation requires a different status.
    IllegalState {
        operation: &'static str,
        status: DepositionStatus,
    },
    /// A file with this name already exists on the deposition.
    DuplicateFile(String),
    /// No file with this name exists on the deposition.
    FileNotFound(String),
    /// Stored status string did not parse.
    UnknownStatus(String),
}

impl fmt::Display for DepositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepositionError::IllegalState { operation, status } => {
                write!(f, "illegal deposition operation '{operation}' in status '{}'", status.as_str())
            }
            DepositionError::DuplicateFile(name) => write!(f, "duplicate deposition file: {name:?}"),
            DepositionError::FileNotFound(name) => write!(f, "deposition file not found: {name:?}"),
            DepositionError::UnknownStatus(s) => write!(f, "unknown deposition status: {s:?}"),
        }
    }
}

impl std::error::Error for DepositionError {}

// ---------------------------------------------------------------------------
// DepositionFile
// ---------------------------------------------------------------------------

/// Metadata of one uploaded file. The bytes live on disk under the
/// deposition's file directory, keyed by the deposition SRN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositionFile {
    pub name: String,
    pub size: i64,
    /// SHA-256 of the content, hex-encoded.
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Deposition
// ---------------------------------------------------------------------------

/// A submission in progress. Owned by a user, or by the system identity for
/// source-ingested depositions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposition {
    pub srn: DepositionSrn,
    pub status: DepositionStatus,
    pub metadata: Value,
    pub files: Vec<DepositionFile>,
    pub convention_srn: ConventionSrn,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_srn: Option<RecordSrn>,
    /// Source ingestion provenance (source id, run id, ...). Empty object for
    /// user depositions.
    #[serde(default)]
    pub provenance: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposition {
    /// Create a fresh draft.
    pub fn new(
        srn: DepositionSrn,
        convention_srn: ConventionSrn,
        owner_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Deposition {
            srn,
            status: DepositionStatus::Draft,
            metadata: Value::Object(Default::default()),
            files: Vec::new(),
            convention_srn,
            owner_id,
            record_srn: None,
            provenance: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    fn require_draft(&self, operation: &'static str) -> Result<(), DepositionError> {
        if self.status != DepositionStatus::Draft {
            return Err(DepositionError::IllegalState {
                operation,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Replace the metadata document. Draft only.
    pub fn update_metadata(&mut self, metadata: Value, now: DateTime<Utc>) -> Result<(), DepositionError> {
        self.require_draft("update_metadata")?;
        self.metadata = metadata;
        self.updated_at = now;
        Ok(())
    }

    /// Attach an uploaded file. Draft only; names are unique.
    pub fn add_file(&mut self, file: DepositionFile, now: DateTime<Utc>) -> Result<(), DepositionError> {
        self.require_draft("add_file")?;
        if self.files.iter().any(|f| f.name == file.name) {
            return Err(DepositionError::DuplicateFile(file.name));
        }
        self.files.push(file);
        self.updated_at = now;
        Ok(())
    }

    /// Detach a file by name. Draft only.
    pub fn remove_file(&mut self, name: &str, now: DateTime<Utc>) -> Result<DepositionFile, DepositionError> {
        self.require_draft("remove_file")?;
        let idx = self
            .files
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| DepositionError::FileNotFound(name.to_string()))?;
        self.updated_at = now;
        Ok(self.files.remove(idx))
    }

    /// Draft → InValidation. The minimum-file-count gate against the
    /// convention is enforced by the deposition service, which has the
    /// convention at hand.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<(), DepositionError> {
        self.require_draft("submit")?;
        self.status = DepositionStatus::InValidation;
        self.updated_at = now;
        Ok(())
    }

    /// InValidation → Draft, used when validation fails.
    pub fn return_to_draft(&mut self, now: DateTime<Utc>) -> Result<(), DepositionError> {
        if self.status != DepositionStatus::InValidation {
            return Err(DepositionError::IllegalState {
                operation: "return_to_draft",
                status: self.status,
            });
        }
        self.status = DepositionStatus::Draft;
        self.updated_at = now;
        Ok(())
    }

    /// InValidation → Accepted, recording the published record.
    pub fn accept(&mut self, record_srn: RecordSrn, now: DateTime<Utc>) -> Result<(), DepositionError> {
        if self.status != DepositionStatus::InValidation {
            return Err(DepositionError::IllegalState {
                operation: "accept",
                status: self.status,
            });
        }
        self.status = DepositionStatus::Accepted;
        self.record_srn = Some(record_srn);
        self.updated_at = now;
        Ok(())
    }

    /// InValidation → Rejected.
    pub fn reject(&mut self, now: DateTime<Utc>) -> Result<(), DepositionError> {
        if self.status != DepositionStatus::InValidation {
            return Err(DepositionError::IllegalState {
                operation: "reject",
                status: self.status,
            });
        }
        self.status = DepositionStatus::Rejected;
        self.updated_at = now;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
