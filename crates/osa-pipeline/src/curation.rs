//! Curation domain. The auto-approval path is event-driven; manual
//! curation decisions arrive through [`CurationService`] from the command
//! surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use osa_domain::deposition::{Deposition, DepositionStatus};
use osa_domain::identity::{AuthPolicy, Identity, Role};
use osa_domain::ports::{ConventionRepository, DepositionRepository, FileStorage};
use osa_events::events::{DepositionApproved, ValidationCompleted, ValidationStatus};
use osa_events::handler::{HandlerResult, Handles};
use osa_events::outbox::Outbox;
use osa_events::worker_config::WorkerConfig;
use osa_events::DomainEvent;
use osa_srn::DepositionSrn;

// ---------------------------------------------------------------------------
// CurationService
// ---------------------------------------------------------------------------

const CURATE_POLICY: AuthPolicy = AuthPolicy::AtLeast(Role::Curator);

/// Curator decisions on depositions whose convention requires manual
/// curation.
pub struct CurationService {
    depositions: Arc<dyn DepositionRepository>,
    conventions: Arc<dyn ConventionRepository>,
    storage: Arc<dyn FileStorage>,
    outbox: Arc<Outbox>,
}

impl CurationService {
    pub fn new(
        depositions: Arc<dyn DepositionRepository>,
        conventions: Arc<dyn ConventionRepository>,
        storage: Arc<dyn FileStorage>,
        outbox: Arc<Outbox>,
    ) -> Self {
        CurationService {
            depositions,
            conventions,
            storage,
            outbox,
        }
    }

    async fn load_in_validation(&self, srn: &DepositionSrn) -> Result<Deposition> {
        let deposition = self
            .depositions
            .get(srn)
            .await?
            .with_context(|| format!("deposition not found: {srn}"))?;
        anyhow::ensure!(
            deposition.status == DepositionStatus::InValidation,
            "deposition '{srn}' is not awaiting curation (status: {})",
            deposition.status.as_str()
        );
        Ok(deposition)
    }

    /// Approve a waiting deposition. Emits the same enriched
    /// `DepositionApproved` the auto-approval path does, so the publication
    /// chain is identical for both.
    pub async fn approve(&self, identity: &Identity, srn: &DepositionSrn) -> Result<()> {
        CURATE_POLICY.authorize(identity)?;
        let deposition = self.load_in_validation(srn).await?;
        let convention = self
            .conventions
            .get(&deposition.convention_srn)
            .await?
            .with_context(|| format!("convention not found: {}", deposition.convention_srn))?;

        self.outbox
            .append(&DepositionApproved {
                id: Uuid::new_v4(),
                deposition_srn: deposition.srn.clone(),
                metadata: deposition.metadata.clone(),
                convention_srn: convention.srn.clone(),
                hooks: convention.hook_snapshots(),
                files_dir: self.storage.files_dir(srn).to_string_lossy().into_owned(),
            })
            .await?;
        info!(deposition = %srn, curator = ?identity, "deposition approved by curator");
        Ok(())
    }

    /// Reject a waiting deposition. Terminal — the submitter starts over
    /// with a fresh deposition.
    pub async fn reject(&self, identity: &Identity, srn: &DepositionSrn) -> Result<Deposition> {
        CURATE_POLICY.authorize(identity)?;
        let mut deposition = self.load_in_validation(srn).await?;
        deposition.reject(Utc::now())?;
        self.depositions.save(&deposition).await?;
        info!(deposition = %srn, curator = ?identity, "deposition rejected by curator");
        Ok(deposition)
    }
}

/// Handles `ValidationCompleted`: approves the deposition when validation
/// passed and its convention does not require manual curation.
pub struct AutoApproveCuration {
    pub conventions: Arc<dyn ConventionRepository>,
    pub outbox: Arc<Outbox>,
}

impl AutoApproveCuration {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("AutoApproveCuration", ValidationCompleted::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<ValidationCompleted> for AutoApproveCuration {
    async fn handle(&self, event: ValidationCompleted) -> HandlerResult {
        if event.status != ValidationStatus::Completed {
            warn!(
                deposition = %event.deposition_srn,
                status = ?event.status,
                "validation did not pass; not auto-approving"
            );
            return Ok(());
        }

        let requires_manual = self
            .conventions
            .get(&event.convention_srn)
            .await?
            .map(|c| c.requires_manual_curation)
            .unwrap_or(false);
        if requires_manual {
            info!(
                deposition = %event.deposition_srn,
                "manual curation required; awaiting curator"
            );
            return Ok(());
        }

        self.outbox
            .append(&DepositionApproved {
                id: Uuid::new_v4(),
                deposition_srn: event.deposition_srn.clone(),
                metadata: event.metadata.clone(),
                convention_srn: event.convention_srn.clone(),
                hooks: event.hooks.clone(),
                files_dir: event.files_dir.clone(),
            })
            .await?;
        debug!(deposition = %event.deposition_srn, "deposition auto-approved");
        Ok(())
    }
}
