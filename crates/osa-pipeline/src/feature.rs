//! Feature domain: per-hook feature tables and feature-row ingestion.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use osa_domain::hook::HookSnapshot;
use osa_domain::identity::{AuthPolicy, Identity};
use osa_domain::ports::{FeatureStore, FileStorage};
use osa_events::events::{ConventionReady, ConventionRegistered, RecordPublished};
use osa_events::handler::{HandlerResult, Handles};
use osa_events::outbox::Outbox;
use osa_events::worker_config::WorkerConfig;
use osa_events::DomainEvent;
use osa_srn::{DepositionSrn, RecordSrn};

pub struct FeatureService {
    feature_store: Arc<dyn FeatureStore>,
    storage: Arc<dyn FileStorage>,
}

impl FeatureService {
    pub fn new(feature_store: Arc<dyn FeatureStore>, storage: Arc<dyn FileStorage>) -> Self {
        FeatureService {
            feature_store,
            storage,
        }
    }

    pub async fn create_table_from_snapshot(&self, snapshot: &HookSnapshot) -> Result<()> {
        self.feature_store
            .create_table(&snapshot.name, &snapshot.features)
            .await
    }

    /// Read each hook's `features.json` (if present) and insert one row per
    /// entry into the hook's feature table, keyed by the record SRN.
    pub async fn insert_features_for_record(
        &self,
        deposition_srn: &DepositionSrn,
        record_srn: &RecordSrn,
        hooks: &[HookSnapshot],
    ) -> Result<()> {
        for hook in hooks {
            if !self
                .storage
                .hook_features_exist(deposition_srn, &hook.name)
                .await?
            {
                continue;
            }
            let rows = self
                .storage
                .read_hook_features(deposition_srn, &hook.name)
                .await?;
            if rows.is_empty() {
                continue;
            }
            let written = self
                .feature_store
                .insert_features(&hook.name, &hook.features, record_srn, &rows)
                .await?;
            debug!(
                hook = %hook.name,
                record = %record_srn,
                rows = written,
                "feature rows inserted"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CreateFeatureTables
// ---------------------------------------------------------------------------

/// Handles `ConventionRegistered`: one feature table per hook, then
/// `ConventionReady`. If any DDL fails the transaction rolls back, no
/// readiness event is emitted, and the delivery retries.
pub struct CreateFeatureTables {
    pub service: Arc<FeatureService>,
    pub outbox: Arc<Outbox>,
}

impl CreateFeatureTables {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("CreateFeatureTables", ConventionRegistered::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<ConventionRegistered> for CreateFeatureTables {
    async fn handle(&self, event: ConventionRegistered) -> HandlerResult {
        for hook in &event.hooks {
            info!(
                convention = %event.convention_srn,
                hook = %hook.name,
                "creating feature table"
            );
            self.service.create_table_from_snapshot(hook).await?;
        }

        self.outbox
            .append(&ConventionReady {
                id: Uuid::new_v4(),
                convention_srn: event.convention_srn.clone(),
            })
            .await?;
        info!(convention = %event.convention_srn, "convention ready");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InsertRecordFeatures
// ---------------------------------------------------------------------------

/// Handles `RecordPublished`: moves hook feature output into the feature
/// tables for the freshly published record.
pub struct InsertRecordFeatures {
    pub service: Arc<FeatureService>,
}

impl InsertRecordFeatures {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("InsertRecordFeatures", RecordPublished::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<RecordPublished> for InsertRecordFeatures {
    async fn handle(&self, event: RecordPublished) -> HandlerResult {
        if event.hooks.is_empty() {
            return Ok(());
        }
        self.service
            .insert_features_for_record(&event.deposition_srn, &event.record_srn, &event.hooks)
            .await?;
        Ok(())
    }
}
