//! Convention domain: registration and lookup of submission templates.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use osa_domain::convention::{Convention, FileRequirements, SourceDefinition};
use osa_domain::hook::HookDefinition;
use osa_domain::identity::{AuthPolicy, Identity, Role};
use osa_domain::ports::ConventionRepository;
use osa_events::events::ConventionRegistered;
use osa_events::outbox::Outbox;
use osa_srn::{ConventionSrn, SchemaSrn, Semver};

/// Everything needed to register a convention version.
#[derive(Debug, Clone)]
pub struct NewConvention {
    /// Local id for the SRN (slug); a fresh one is generated when absent.
    pub local_id: Option<String>,
    pub version: Semver,
    pub title: String,
    pub description: Option<String>,
    pub schema_srn: SchemaSrn,
    pub file_requirements: FileRequirements,
    pub hooks: Vec<HookDefinition>,
    pub source: Option<SourceDefinition>,
    pub requires_manual_curation: bool,
}

const REGISTER_POLICY: AuthPolicy = AuthPolicy::AtLeast(Role::Curator);

pub struct ConventionService {
    conventions: Arc<dyn ConventionRepository>,
    outbox: Arc<Outbox>,
    node_domain: String,
}

impl ConventionService {
    pub fn new(
        conventions: Arc<dyn ConventionRepository>,
        outbox: Arc<Outbox>,
        node_domain: String,
    ) -> Self {
        ConventionService {
            conventions,
            outbox,
            node_domain,
        }
    }

    /// Register an immutable convention version and announce it.
    ///
    /// `ConventionRegistered` carries the hook snapshots, so the feature
    /// domain creates its tables without loading the convention back.
    pub async fn register(
        &self,
        identity: &Identity,
        spec: NewConvention,
    ) -> Result<Convention> {
        REGISTER_POLICY.authorize(identity)?;

        let local_id = spec
            .local_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let srn = ConventionSrn::new(&self.node_domain, &local_id, spec.version)?;

        let convention = Convention {
            srn: srn.clone(),
            title: spec.title,
            description: spec.description,
            schema_srn: spec.schema_srn,
            file_requirements: spec.file_requirements,
            hooks: spec.hooks,
            source: spec.source,
            requires_manual_curation: spec.requires_manual_curation,
            created_at: Utc::now(),
        };
        self.conventions.save(&convention).await?;

        self.outbox
            .append(&ConventionRegistered {
                id: Uuid::new_v4(),
                convention_srn: srn.clone(),
                hooks: convention.hook_snapshots(),
            })
            .await?;

        info!(convention = %srn, hooks = convention.hooks.len(), "convention registered");
        Ok(convention)
    }

    pub async fn get(&self, srn: &ConventionSrn) -> Result<Convention> {
        self.conventions
            .get(srn)
            .await?
            .with_context(|| format!("convention not found: {srn}"))
    }

    pub async fn list(&self) -> Result<Vec<Convention>> {
        self.conventions.list().await
    }
}
