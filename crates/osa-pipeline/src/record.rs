//! Record domain: publishing approved depositions as immutable records.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use osa_domain::deposition::DepositionError;
use osa_domain::hook::HookSnapshot;
use osa_domain::identity::{AuthPolicy, Identity};
use osa_domain::ports::{DepositionRepository, RecordRepository};
use osa_domain::record::Record;
use osa_events::events::{DepositionApproved, RecordPublished};
use osa_events::handler::{HandlerResult, Handles};
use osa_events::outbox::Outbox;
use osa_events::worker_config::WorkerConfig;
use osa_events::DomainEvent;
use osa_srn::{ConventionSrn, DepositionSrn, RecordSrn};

pub struct RecordService {
    records: Arc<dyn RecordRepository>,
    depositions: Arc<dyn DepositionRepository>,
    outbox: Arc<Outbox>,
    node_domain: String,
}

impl RecordService {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        depositions: Arc<dyn DepositionRepository>,
        outbox: Arc<Outbox>,
        node_domain: String,
    ) -> Self {
        RecordService {
            records,
            depositions,
            outbox,
            node_domain,
        }
    }

    /// Publish a record for an approved deposition.
    ///
    /// Every call mints a fresh SRN at version 1 — records are immutable
    /// and never re-published in place. A replayed approval therefore
    /// yields a second record for the same deposition; consumers that care
    /// de-duplicate on `deposition_srn`.
    pub async fn publish_record(
        &self,
        deposition_srn: &DepositionSrn,
        metadata: Value,
        convention_srn: Option<ConventionSrn>,
        hooks: Vec<HookSnapshot>,
        files_dir: String,
    ) -> Result<Record> {
        let record_srn = RecordSrn::new(&self.node_domain, &Uuid::new_v4().to_string(), 1)?;
        let record = Record::new(
            record_srn.clone(),
            deposition_srn.clone(),
            metadata.clone(),
            Utc::now(),
        );
        self.records.save(&record).await?;
        debug!(record = %record_srn, deposition = %deposition_srn, "record persisted");

        self.mark_deposition_accepted(deposition_srn, &record_srn).await?;

        self.outbox
            .append(&RecordPublished {
                id: Uuid::new_v4(),
                record_srn: record_srn.clone(),
                deposition_srn: deposition_srn.clone(),
                metadata,
                convention_srn,
                hooks,
                files_dir,
            })
            .await?;

        info!(record = %record_srn, deposition = %deposition_srn, "record published");
        Ok(record)
    }

    /// Flip the deposition to `accepted`, recording the record SRN.
    /// Replays (deposition already accepted) are a no-op.
    async fn mark_deposition_accepted(
        &self,
        deposition_srn: &DepositionSrn,
        record_srn: &RecordSrn,
    ) -> Result<()> {
        let mut deposition = match self.depositions.get(deposition_srn).await? {
            Some(deposition) => deposition,
            None => {
                warn!(deposition = %deposition_srn, "publishing record for unknown deposition");
                return Ok(());
            }
        };
        match deposition.accept(record_srn.clone(), Utc::now()) {
            Ok(()) => self.depositions.save(&deposition).await,
            Err(DepositionError::IllegalState { .. }) => {
                debug!(
                    deposition = %deposition_srn,
                    status = %deposition.status.as_str(),
                    "accept no-op on replay"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get(&self, srn: &RecordSrn) -> Result<Option<Record>> {
        self.records.get(srn).await
    }
}

// ---------------------------------------------------------------------------
// ConvertDepositionToRecord
// ---------------------------------------------------------------------------

/// Handles `DepositionApproved`: creates and publishes the record.
pub struct ConvertDepositionToRecord {
    pub service: Arc<RecordService>,
}

impl ConvertDepositionToRecord {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("ConvertDepositionToRecord", DepositionApproved::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<DepositionApproved> for ConvertDepositionToRecord {
    async fn handle(&self, event: DepositionApproved) -> HandlerResult {
        self.service
            .publish_record(
                &event.deposition_srn,
                event.metadata.clone(),
                Some(event.convention_srn.clone()),
                event.hooks.clone(),
                event.files_dir.clone(),
            )
            .await?;
        Ok(())
    }
}
