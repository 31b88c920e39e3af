//! The node's event vocabulary.
//!
//! Events are enriched at emission time with everything their consumers
//! need (convention SRN, hook snapshots, files dir) so downstream handlers
//! can run without re-querying upstream aggregates.
//!
//! Timestamps serialize as RFC 3339 UTC; SRNs as canonical strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use osa_domain::hook::HookSnapshot;
use osa_srn::{ConventionSrn, DepositionSrn, RecordSrn, ValidationRunSrn};

use crate::envelope::DomainEvent;
use crate::registry::{EventTypeRegistry, RegistryError};

macro_rules! domain_event {
    ($ty:ident) => {
        impl DomainEvent for $ty {
            const EVENT_TYPE: &'static str = stringify!($ty);

            fn event_id(&self) -> Uuid {
                self.id
            }
        }
    };
}

/// Register every event type this node emits or consumes.
///
/// # Errors
/// Propagates duplicate registrations (a wiring bug).
pub fn register_all(registry: &mut EventTypeRegistry) -> Result<(), RegistryError> {
    registry.register::<ServerStarted>()?;
    registry.register::<SourceRequested>()?;
    registry.register::<SourceRecordReady>()?;
    registry.register::<SourceRunCompleted>()?;
    registry.register::<DepositionCreated>()?;
    registry.register::<MetadataUpdated>()?;
    registry.register::<FileUploaded>()?;
    registry.register::<FileDeleted>()?;
    registry.register::<DepositionSubmitted>()?;
    registry.register::<ValidationCompleted>()?;
    registry.register::<ValidationFailed>()?;
    registry.register::<DepositionApproved>()?;
    registry.register::<RecordPublished>()?;
    registry.register::<IndexRecord>()?;
    registry.register::<ConventionRegistered>()?;
    registry.register::<ConventionReady>()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Emitted once when the pool starts and the event system is ready.
/// Startup-triggered handlers (initial source runs, cache warming) subscribe
/// to this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStarted {
    pub id: Uuid,
}

domain_event!(ServerStarted);

// ---------------------------------------------------------------------------
// Source domain
// ---------------------------------------------------------------------------

/// Request to pull from a convention's upstream source.
///
/// Chunked processing: `offset` is the starting position for this chunk and
/// `session` carries opaque pagination state from the previous chunk's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRequested {
    pub id: Uuid,
    pub convention_srn: ConventionSrn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
}

fn default_chunk_size() -> i64 {
    1000
}

impl SourceRequested {
    pub fn new(convention_srn: ConventionSrn) -> Self {
        SourceRequested {
            id: Uuid::new_v4(),
            convention_srn,
            since: None,
            limit: None,
            offset: 0,
            chunk_size: default_chunk_size(),
            session: None,
        }
    }
}

domain_event!(SourceRequested);

/// One record produced by a source run; consumed by the deposition domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecordReady {
    pub id: Uuid,
    pub convention_srn: ConventionSrn,
    pub metadata: Value,
    pub file_paths: Vec<String>,
    pub source_id: String,
    pub staging_dir: String,
}

domain_event!(SourceRecordReady);

/// Emitted after every source run chunk, final or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRunCompleted {
    pub id: Uuid,
    pub convention_srn: ConventionSrn,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub record_count: i64,
    pub is_final_chunk: bool,
}

domain_event!(SourceRunCompleted);

// ---------------------------------------------------------------------------
// Deposition / validation / curation
// ---------------------------------------------------------------------------

/// Emitted when a new deposition is created. Audit-only today — nothing
/// subscribes, but the changefeed records every draft's origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositionCreated {
    pub id: Uuid,
    pub deposition_srn: DepositionSrn,
    pub convention_srn: ConventionSrn,
    pub owner_id: String,
}

domain_event!(DepositionCreated);

/// Emitted when a deposition's metadata document is replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdated {
    pub id: Uuid,
    pub deposition_srn: DepositionSrn,
    pub metadata: Value,
}

domain_event!(MetadataUpdated);

/// Emitted when a file is uploaded to a deposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUploaded {
    pub id: Uuid,
    pub deposition_srn: DepositionSrn,
    pub filename: String,
    pub size: i64,
    pub checksum: String,
}

domain_event!(FileUploaded);

/// Emitted when a file is removed from a deposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDeleted {
    pub id: Uuid,
    pub deposition_srn: DepositionSrn,
    pub filename: String,
}

domain_event!(FileDeleted);

/// Emitted when a deposition enters validation. Enriched with the
/// convention SRN, hook snapshots and files dir so the validation domain
/// never touches deposition repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositionSubmitted {
    pub id: Uuid,
    pub deposition_srn: DepositionSrn,
    pub metadata: Value,
    pub convention_srn: ConventionSrn,
    #[serde(default)]
    pub hooks: Vec<HookSnapshot>,
    #[serde(default)]
    pub files_dir: String,
}

domain_event!(DepositionSubmitted);

/// Terminal status of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Completed,
    Failed,
    Rejected,
}

/// Emitted when validation finishes cleanly for a deposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCompleted {
    pub id: Uuid,
    pub validation_run_srn: ValidationRunSrn,
    pub deposition_srn: DepositionSrn,
    pub convention_srn: ConventionSrn,
    pub status: ValidationStatus,
    #[serde(default)]
    pub hook_results: Vec<Value>,
    pub metadata: Value,
    #[serde(default)]
    pub hooks: Vec<HookSnapshot>,
    #[serde(default)]
    pub files_dir: String,
}

domain_event!(ValidationCompleted);

/// Emitted when validation fails; consumed by the return-to-draft handler
/// and surfaced to the depositor as the `reasons` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailed {
    pub id: Uuid,
    pub deposition_srn: DepositionSrn,
    pub convention_srn: ConventionSrn,
    pub status: ValidationStatus,
    pub reasons: Vec<String>,
}

domain_event!(ValidationFailed);

/// Emitted when a deposition clears curation and may be published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositionApproved {
    pub id: Uuid,
    pub deposition_srn: DepositionSrn,
    pub metadata: Value,
    pub convention_srn: ConventionSrn,
    #[serde(default)]
    pub hooks: Vec<HookSnapshot>,
    #[serde(default)]
    pub files_dir: String,
}

domain_event!(DepositionApproved);

// ---------------------------------------------------------------------------
// Record / index
// ---------------------------------------------------------------------------

/// Emitted when a record is published and ready for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPublished {
    pub id: Uuid,
    pub record_srn: RecordSrn,
    pub deposition_srn: DepositionSrn,
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convention_srn: Option<ConventionSrn>,
    #[serde(default)]
    pub hooks: Vec<HookSnapshot>,
    #[serde(default)]
    pub files_dir: String,
}

domain_event!(RecordPublished);

/// Per-backend indexing request for a single record. One of these exists per
/// registered backend so retries and failures stay isolated per backend;
/// the delivery's routing key is the backend name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: Uuid,
    pub backend_name: String,
    pub record_srn: RecordSrn,
    pub metadata: Value,
}

domain_event!(IndexRecord);

// ---------------------------------------------------------------------------
// Convention lifecycle
// ---------------------------------------------------------------------------

/// Emitted when a convention is registered. Carries the hook snapshots so
/// feature-table creation runs without reloading the convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConventionRegistered {
    pub id: Uuid,
    pub convention_srn: ConventionSrn,
    #[serde(default)]
    pub hooks: Vec<HookSnapshot>,
}

domain_event!(ConventionRegistered);

/// Emitted when a convention's feature tables exist and source runs may
/// begin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConventionReady {
    pub id: Uuid,
    pub convention_srn: ConventionSrn,
}

domain_event!(ConventionReady);

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventEnvelope;
    use serde_json::json;

    #[test]
    fn every_event_type_registers_once() {
        let mut registry = EventTypeRegistry::new();
        register_all(&mut registry).unwrap();
        assert!(registry.contains("RecordPublished"));
        assert!(registry.contains("ServerStarted"));
        assert_eq!(registry.names().len(), 16);
    }

    #[test]
    fn record_published_round_trips() {
        let event = RecordPublished {
            id: Uuid::new_v4(),
            record_srn: RecordSrn::parse("urn:osa:n1.org:rec:r-1@1").unwrap(),
            deposition_srn: DepositionSrn::parse("urn:osa:n1.org:dep:d-1").unwrap(),
            metadata: json!({"title": "T"}),
            convention_srn: None,
            hooks: vec![],
            files_dir: String::new(),
        };
        let envelope = EventEnvelope::encode(&event).unwrap();
        assert_eq!(envelope.event_type, "RecordPublished");
        let back: RecordPublished = envelope.decode().unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn source_requested_defaults_chunking_fields() {
        let json = json!({
            "id": Uuid::new_v4(),
            "convention_srn": "urn:osa:n1.org:conv:tpl-a@1.0.0",
        });
        let event: SourceRequested = serde_json::from_value(json).unwrap();
        assert_eq!(event.offset, 0);
        assert_eq!(event.chunk_size, 1000);
        assert!(event.session.is_none());
    }

    #[test]
    fn decode_rejects_mismatched_type() {
        let started = ServerStarted { id: Uuid::new_v4() };
        let envelope = EventEnvelope::encode(&started).unwrap();
        assert!(envelope.decode::<ConventionReady>().is_err());
    }

    #[test]
    fn timestamps_serialize_as_rfc3339() {
        let event = SourceRunCompleted {
            id: Uuid::new_v4(),
            convention_srn: ConventionSrn::parse("urn:osa:n1.org:conv:tpl-a@1.0.0").unwrap(),
            started_at: "2026-01-02T03:04:05Z".parse().unwrap(),
            completed_at: "2026-01-02T03:05:05Z".parse().unwrap(),
            record_count: 3,
            is_final_chunk: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        let started = value["started_at"].as_str().unwrap();
        assert!(started.starts_with("2026-01-02T03:04:05"), "got {started}");
    }
}
