//! Shared fixtures for scenario tests.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use osa_domain::convention::{Convention, FileRequirements, InitialRun, SourceDefinition};
use osa_events::envelope::DomainEvent;
use osa_domain::hook::{
    ColumnType, FeatureColumn, FeatureSchema, HookCardinality, HookDefinition, HookManifest,
    ResourceLimits, RunnerKind,
};
use osa_srn::{ConventionSrn, SchemaSrn, Semver};

pub const NODE_DOMAIN: &str = "n1.org";

/// Throwaway event type for protocol-level tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DummyEvent {
    pub id: Uuid,
    pub n: i64,
}

impl DummyEvent {
    pub fn new(n: i64) -> Self {
        DummyEvent {
            id: Uuid::new_v4(),
            n,
        }
    }
}

impl DomainEvent for DummyEvent {
    const EVENT_TYPE: &'static str = "DummyEvent";

    fn event_id(&self) -> Uuid {
        self.id
    }
}

pub fn convention_srn(local_id: &str) -> ConventionSrn {
    ConventionSrn::new(NODE_DOMAIN, local_id, Semver::parse("1.0.0").expect("semver"))
        .expect("convention srn")
}

/// A minimal convention: one required file, no hooks, no source.
pub fn bare_convention(local_id: &str) -> Convention {
    Convention {
        srn: convention_srn(local_id),
        title: format!("Convention {local_id}"),
        description: None,
        schema_srn: SchemaSrn::parse("urn:osa:n1.org:schema:base@1.0.0").expect("schema srn"),
        file_requirements: FileRequirements {
            accepted_types: vec![],
            min_count: 1,
            max_count: 16,
            max_file_size: 10 * 1024 * 1024,
        },
        hooks: vec![],
        source: None,
        requires_manual_curation: false,
        created_at: Utc::now(),
    }
}

pub fn checksum_hook() -> HookDefinition {
    HookDefinition {
        image: "ghcr.io/osa/checksum-hook".to_string(),
        digest: "sha256:feedface".to_string(),
        runner: RunnerKind::Docker,
        config: json!({}),
        limits: ResourceLimits::default(),
        manifest: HookManifest {
            name: "checksum".to_string(),
            target_schema: SchemaSrn::parse("urn:osa:n1.org:schema:base@1.0.0").expect("schema srn"),
            cardinality: HookCardinality::One,
            feature_schema: FeatureSchema {
                columns: vec![FeatureColumn {
                    name: "digest".to_string(),
                    column_type: ColumnType::Text,
                    required: true,
                }],
            },
        },
    }
}

pub fn convention_with_hook(local_id: &str) -> Convention {
    let mut convention = bare_convention(local_id);
    convention.hooks = vec![checksum_hook()];
    convention
}

pub fn convention_with_source(local_id: &str, initial_limit: Option<i64>) -> Convention {
    let mut convention = bare_convention(local_id);
    convention.source = Some(SourceDefinition {
        image: "ghcr.io/osa/demo-source".to_string(),
        digest: "sha256:cafef00d".to_string(),
        config: json!({"endpoint": "https://upstream.example.org"}),
        schedule: None,
        initial_run: Some(InitialRun { limit: initial_limit }),
    });
    convention
}
