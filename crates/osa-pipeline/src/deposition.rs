//! Deposition domain: command service plus the source-ingest and
//! return-to-draft handlers.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use osa_domain::convention::Convention;
use osa_domain::deposition::{Deposition, DepositionError, DepositionFile};
use osa_domain::identity::{AuthPolicy, Identity, Role};
use osa_domain::ports::{ConventionRepository, DepositionRepository, FileStorage};
use osa_events::events::{
    DepositionCreated, DepositionSubmitted, FileDeleted, FileUploaded, MetadataUpdated,
    SourceRecordReady, ValidationFailed,
};
use osa_events::handler::{HandlerResult, Handles};
use osa_events::outbox::Outbox;
use osa_events::worker_config::WorkerConfig;
use osa_events::DomainEvent;
use osa_srn::DepositionSrn;

// ---------------------------------------------------------------------------
// DepositionService
// ---------------------------------------------------------------------------

/// Commands over the deposition aggregate. File-requirement enforcement
/// happens here, where the convention is at hand; state transitions live on
/// the aggregate.
pub struct DepositionService {
    depositions: Arc<dyn DepositionRepository>,
    conventions: Arc<dyn ConventionRepository>,
    storage: Arc<dyn FileStorage>,
    outbox: Arc<Outbox>,
    node_domain: String,
}

const CREATE_POLICY: AuthPolicy = AuthPolicy::AtLeast(Role::Depositor);

impl DepositionService {
    pub fn new(
        depositions: Arc<dyn DepositionRepository>,
        conventions: Arc<dyn ConventionRepository>,
        storage: Arc<dyn FileStorage>,
        outbox: Arc<Outbox>,
        node_domain: String,
    ) -> Self {
        DepositionService {
            depositions,
            conventions,
            storage,
            outbox,
            node_domain,
        }
    }

    async fn load(&self, srn: &DepositionSrn) -> Result<Deposition> {
        self.depositions
            .get(srn)
            .await?
            .with_context(|| format!("deposition not found: {srn}"))
    }

    async fn load_convention(&self, deposition: &Deposition) -> Result<Convention> {
        self.conventions
            .get(&deposition.convention_srn)
            .await?
            .with_context(|| format!("convention not found: {}", deposition.convention_srn))
    }

    /// Create a fresh draft under the caller's identity.
    pub async fn create(
        &self,
        identity: &Identity,
        convention_srn: &osa_srn::ConventionSrn,
    ) -> Result<Deposition> {
        CREATE_POLICY.authorize(identity)?;
        let convention = self
            .conventions
            .get(convention_srn)
            .await?
            .with_context(|| format!("convention not found: {convention_srn}"))?;

        let srn = DepositionSrn::new(&self.node_domain, &Uuid::new_v4().to_string())?;
        let deposition = Deposition::new(
            srn,
            convention.srn.clone(),
            identity.owner_id(),
            Utc::now(),
        );
        self.depositions.save(&deposition).await?;

        self.outbox
            .append(&DepositionCreated {
                id: Uuid::new_v4(),
                deposition_srn: deposition.srn.clone(),
                convention_srn: deposition.convention_srn.clone(),
                owner_id: deposition.owner_id.clone(),
            })
            .await?;

        debug!(deposition = %deposition.srn, "deposition created");
        Ok(deposition)
    }

    pub async fn get(&self, srn: &DepositionSrn) -> Result<Deposition> {
        self.load(srn).await
    }

    pub async fn update_metadata(
        &self,
        identity: &Identity,
        srn: &DepositionSrn,
        metadata: Value,
    ) -> Result<Deposition> {
        CREATE_POLICY.authorize(identity)?;
        let mut deposition = self.load(srn).await?;
        deposition.update_metadata(metadata.clone(), Utc::now())?;
        self.depositions.save(&deposition).await?;

        self.outbox
            .append(&MetadataUpdated {
                id: Uuid::new_v4(),
                deposition_srn: deposition.srn.clone(),
                metadata,
            })
            .await?;
        Ok(deposition)
    }

    /// Store a file and attach it, enforcing the convention's file
    /// requirements (type, size, count).
    pub async fn upload_file(
        &self,
        identity: &Identity,
        srn: &DepositionSrn,
        filename: &str,
        content: &[u8],
        content_type: Option<&str>,
    ) -> Result<Deposition> {
        CREATE_POLICY.authorize(identity)?;
        let mut deposition = self.load(srn).await?;
        let requirements = self.load_convention(&deposition).await?.file_requirements;

        let extension = file_extension(filename);
        if !requirements.accepts_extension(&extension) {
            bail!(
                "file type '{extension}' not accepted; allowed: {:?}",
                requirements.accepted_types
            );
        }
        if content.len() as i64 > requirements.max_file_size {
            bail!(
                "file size {} exceeds maximum {}",
                content.len(),
                requirements.max_file_size
            );
        }
        if deposition.files.len() >= requirements.max_count {
            bail!(
                "maximum {} file(s) allowed, already have {}",
                requirements.max_count,
                deposition.files.len()
            );
        }

        let file = self
            .storage
            .save_file(srn, filename, content, content_type)
            .await?;
        let (size, checksum) = (file.size, file.checksum.clone());
        deposition.add_file(file, Utc::now())?;
        self.depositions.save(&deposition).await?;

        self.outbox
            .append(&FileUploaded {
                id: Uuid::new_v4(),
                deposition_srn: deposition.srn.clone(),
                filename: filename.to_string(),
                size,
                checksum,
            })
            .await?;
        Ok(deposition)
    }

    pub async fn delete_file(
        &self,
        identity: &Identity,
        srn: &DepositionSrn,
        filename: &str,
    ) -> Result<Deposition> {
        CREATE_POLICY.authorize(identity)?;
        let mut deposition = self.load(srn).await?;
        deposition.remove_file(filename, Utc::now())?;
        self.storage.delete_file(srn, filename).await?;
        self.depositions.save(&deposition).await?;

        self.outbox
            .append(&FileDeleted {
                id: Uuid::new_v4(),
                deposition_srn: deposition.srn.clone(),
                filename: filename.to_string(),
            })
            .await?;
        Ok(deposition)
    }

    /// Remove every file from a draft in one command.
    pub async fn delete_all_files(
        &self,
        identity: &Identity,
        srn: &DepositionSrn,
    ) -> Result<Deposition> {
        CREATE_POLICY.authorize(identity)?;
        let mut deposition = self.load(srn).await?;
        let names: Vec<String> = deposition.files.iter().map(|f| f.name.clone()).collect();
        for name in &names {
            deposition.remove_file(name, Utc::now())?;
        }
        self.storage.delete_all_files(srn).await?;
        self.depositions.save(&deposition).await?;

        for name in names {
            self.outbox
                .append(&FileDeleted {
                    id: Uuid::new_v4(),
                    deposition_srn: deposition.srn.clone(),
                    filename: name,
                })
                .await?;
        }
        Ok(deposition)
    }

    /// Submit for validation. Emits the enriched `DepositionSubmitted` so
    /// the validation domain runs without loading the deposition again.
    pub async fn submit(&self, identity: &Identity, srn: &DepositionSrn) -> Result<Deposition> {
        CREATE_POLICY.authorize(identity)?;
        let mut deposition = self.load(srn).await?;
        let convention = self.load_convention(&deposition).await?;

        let min_count = convention.file_requirements.min_count;
        if deposition.files.len() < min_count {
            bail!(
                "minimum {min_count} file(s) required, have {}",
                deposition.files.len()
            );
        }

        deposition.submit(Utc::now())?;
        self.depositions.save(&deposition).await?;

        self.outbox
            .append(&DepositionSubmitted {
                id: Uuid::new_v4(),
                deposition_srn: deposition.srn.clone(),
                metadata: deposition.metadata.clone(),
                convention_srn: convention.srn.clone(),
                hooks: convention.hook_snapshots(),
                files_dir: self.storage.files_dir(srn).to_string_lossy().into_owned(),
            })
            .await?;

        info!(deposition = %deposition.srn, "deposition submitted");
        Ok(deposition)
    }

    /// Page through depositions, scoped to an owner when given.
    pub async fn list_depositions(
        &self,
        owner_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Deposition>, i64)> {
        match owner_id {
            Some(owner) => {
                let items = self.depositions.list_by_owner(owner, limit, offset).await?;
                let total = self.depositions.count_by_owner(owner).await?;
                Ok((items, total))
            }
            None => {
                let items = self.depositions.list(limit, offset).await?;
                let total = self.depositions.count().await?;
                Ok((items, total))
            }
        }
    }

    /// Fetch a file's content and metadata in a single deposition lookup.
    pub async fn download_file(
        &self,
        srn: &DepositionSrn,
        filename: &str,
    ) -> Result<(Vec<u8>, DepositionFile)> {
        let deposition = self.load(srn).await?;
        let file = deposition
            .files
            .iter()
            .find(|f| f.name == filename)
            .cloned()
            .with_context(|| format!("file {filename:?} not found in deposition {srn}"))?;
        let content = self.storage.read_file(srn, filename).await?;
        Ok((content, file))
    }

    /// Transition back to draft after a validation failure. Missing
    /// aggregates and already-draft states are tolerated — the handler
    /// driving this runs under at-least-once delivery.
    pub async fn return_to_draft(&self, srn: &DepositionSrn) -> Result<()> {
        let mut deposition = match self.depositions.get(srn).await? {
            Some(deposition) => deposition,
            None => {
                debug!(deposition = %srn, "return_to_draft: deposition missing; ignoring");
                return Ok(());
            }
        };
        match deposition.return_to_draft(Utc::now()) {
            Ok(()) => {
                self.depositions.save(&deposition).await?;
                info!(deposition = %srn, "deposition returned to draft");
            }
            Err(DepositionError::IllegalState { .. }) => {
                // Replayed event; the deposition already left validation.
                debug!(deposition = %srn, status = %deposition.status.as_str(), "return_to_draft no-op");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Create, fill and submit a deposition from a source record, under the
    /// System identity.
    pub async fn create_from_source(&self, event: &SourceRecordReady) -> Result<Deposition> {
        let system = Identity::System;
        let mut deposition = self.create(&system, &event.convention_srn).await?;
        deposition.provenance = json!({
            "source_id": event.source_id,
            "staging_dir": event.staging_dir,
        });
        deposition.update_metadata(event.metadata.clone(), Utc::now())?;

        let staged = self
            .storage
            .move_staged_files(
                std::path::Path::new(&event.staging_dir),
                &event.file_paths,
                &deposition.srn,
            )
            .await?;
        for file in staged {
            deposition.add_file(file, Utc::now())?;
        }
        self.depositions.save(&deposition).await?;

        self.submit(&system, &deposition.srn.clone()).await
    }
}

fn file_extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}


// ---------------------------------------------------------------------------
// CreateDepositionFromSource
// ---------------------------------------------------------------------------

/// Handles `SourceRecordReady`: one deposition per source record.
pub struct CreateDepositionFromSource {
    pub service: Arc<DepositionService>,
}

impl CreateDepositionFromSource {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("CreateDepositionFromSource", SourceRecordReady::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<SourceRecordReady> for CreateDepositionFromSource {
    async fn handle(&self, event: SourceRecordReady) -> HandlerResult {
        let deposition = self.service.create_from_source(&event).await?;
        debug!(
            deposition = %deposition.srn,
            source_id = %event.source_id,
            "deposition created from source record"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ReturnToDraft
// ---------------------------------------------------------------------------

/// Handles `ValidationFailed`: hands the deposition back to its owner.
pub struct ReturnToDraft {
    pub service: Arc<DepositionService>,
}

impl ReturnToDraft {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("ReturnToDraft", ValidationFailed::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<ValidationFailed> for ReturnToDraft {
    async fn handle(&self, event: ValidationFailed) -> HandlerResult {
        warn!(
            deposition = %event.deposition_srn,
            reasons = ?event.reasons,
            "validation failed; returning to draft"
        );
        self.service.return_to_draft(&event.deposition_srn).await?;
        Ok(())
    }
}
