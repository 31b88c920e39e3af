//! Scenario: end-to-end pipeline — submit a deposition, drain the handler
//! chain to fixed point, observe exactly one published, indexed record.
//!
//! Covers the full chain for a hookless convention:
//! DepositionSubmitted → ValidateDeposition → ValidationCompleted →
//! AutoApproveCuration → DepositionApproved → ConvertDepositionToRecord →
//! RecordPublished → {FanOutToIndexBackends, InsertRecordFeatures} →
//! IndexRecord → {VectorIndexHandler, KeywordIndexHandler}.

use std::sync::Arc;

use serde_json::json;

use osa_domain::deposition::DepositionStatus;
use osa_domain::identity::{Identity, Role};
use osa_domain::ports::{DepositionRepository, FileStorage};
use osa_events::delivery::DeliveryStatus;
use osa_events::handler::TypedHandler;
use osa_events::outbox::Outbox;
use osa_events::subscription::SubscriptionRegistry;
use osa_index::IndexRegistry;
use osa_pipeline::curation::AutoApproveCuration;
use osa_pipeline::deposition::DepositionService;
use osa_pipeline::feature::{FeatureService, InsertRecordFeatures};
use osa_pipeline::index::{FanOutToIndexBackends, KeywordIndexHandler, VectorIndexHandler};
use osa_pipeline::record::{ConvertDepositionToRecord, RecordService};
use osa_pipeline::validation::{ValidateDeposition, ValidationService};
use osa_storage::LocalFileStorage;
use osa_testkit::fixtures::{bare_convention, NODE_DOMAIN};
use osa_testkit::{
    MemoryConventionRepository, MemoryDepositionRepository, MemoryEventRepository,
    MemoryFeatureStore, MemoryRecordRepository, MemoryRuntime, RecordingIndexBackend,
    ScriptedSourceRunner,
};
use osa_worker::Worker;

async fn drain(workers: &[Worker]) {
    loop {
        let mut any = false;
        for worker in workers {
            if worker.poll_once().await {
                any = true;
            }
        }
        if !any {
            break;
        }
    }
}

#[tokio::test]
async fn submitted_deposition_becomes_one_indexed_record() -> anyhow::Result<()> {
    // -- fakes and services --------------------------------------------------
    let tmp = tempfile::tempdir()?;
    let storage: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(tmp.path()));
    let depositions = Arc::new(MemoryDepositionRepository::new());
    let conventions = Arc::new(MemoryConventionRepository::new());
    let records = Arc::new(MemoryRecordRepository::new());
    let features = Arc::new(MemoryFeatureStore::new());
    let runner = Arc::new(ScriptedSourceRunner::new());

    let vector = Arc::new(RecordingIndexBackend::new("vector"));
    let keyword = Arc::new(RecordingIndexBackend::new("keyword"));
    let mut indexes = IndexRegistry::new();
    indexes.register(vector.clone());
    indexes.register(keyword.clone());

    let convention = bare_convention("template-a");
    conventions.insert(convention.clone());

    let configs = [
        ValidateDeposition::worker_config(),
        AutoApproveCuration::worker_config(),
        ConvertDepositionToRecord::worker_config(),
        FanOutToIndexBackends::worker_config(),
        InsertRecordFeatures::worker_config(),
        VectorIndexHandler::worker_config(),
        KeywordIndexHandler::worker_config(),
    ];
    let mut subscriptions = SubscriptionRegistry::new();
    for config in &configs {
        subscriptions.subscribe(&config.event_type, &config.name, config.routing_key.as_deref());
    }

    let repo = Arc::new(MemoryEventRepository::new());
    let outbox = Arc::new(Outbox::new(repo.clone(), Arc::new(subscriptions)));

    let deposition_service = Arc::new(DepositionService::new(
        depositions.clone(),
        conventions.clone(),
        storage.clone(),
        outbox.clone(),
        NODE_DOMAIN.to_string(),
    ));
    let validation_service = Arc::new(ValidationService::new(
        storage.clone(),
        runner.clone(),
        NODE_DOMAIN.to_string(),
    ));
    let record_service = Arc::new(RecordService::new(
        records.clone(),
        depositions.clone(),
        outbox.clone(),
        NODE_DOMAIN.to_string(),
    ));
    let feature_service = Arc::new(FeatureService::new(features.clone(), storage.clone()));

    let workers = vec![
        Worker::new(
            MemoryRuntime::new(
                ValidateDeposition::worker_config(),
                Arc::new(TypedHandler::new(
                    ValidateDeposition {
                        service: validation_service,
                        outbox: outbox.clone(),
                    },
                    false,
                )),
            ),
            outbox.clone(),
        ),
        Worker::new(
            MemoryRuntime::new(
                AutoApproveCuration::worker_config(),
                Arc::new(TypedHandler::new(
                    AutoApproveCuration {
                        conventions: conventions.clone(),
                        outbox: outbox.clone(),
                    },
                    false,
                )),
            ),
            outbox.clone(),
        ),
        Worker::new(
            MemoryRuntime::new(
                ConvertDepositionToRecord::worker_config(),
                Arc::new(TypedHandler::new(
                    ConvertDepositionToRecord {
                        service: record_service,
                    },
                    false,
                )),
            ),
            outbox.clone(),
        ),
        Worker::new(
            MemoryRuntime::new(
                FanOutToIndexBackends::worker_config(),
                Arc::new(TypedHandler::new(
                    FanOutToIndexBackends {
                        indexes: indexes.clone(),
                        outbox: outbox.clone(),
                    },
                    false,
                )),
            ),
            outbox.clone(),
        ),
        Worker::new(
            MemoryRuntime::new(
                InsertRecordFeatures::worker_config(),
                Arc::new(TypedHandler::new(
                    InsertRecordFeatures {
                        service: feature_service,
                    },
                    false,
                )),
            ),
            outbox.clone(),
        ),
        Worker::new(
            MemoryRuntime::new(
                VectorIndexHandler::worker_config(),
                Arc::new(TypedHandler::new(
                    VectorIndexHandler {
                        indexes: indexes.clone(),
                    },
                    true,
                )),
            ),
            outbox.clone(),
        ),
        Worker::new(
            MemoryRuntime::new(
                KeywordIndexHandler::worker_config(),
                Arc::new(TypedHandler::new(
                    KeywordIndexHandler {
                        indexes: indexes.clone(),
                    },
                    false,
                )),
            ),
            outbox.clone(),
        ),
    ];

    // -- drive the command side ---------------------------------------------
    let depositor = Identity::User {
        id: "u-1".to_string(),
        role: Role::Depositor,
    };
    let deposition = deposition_service.create(&depositor, &convention.srn).await?;
    deposition_service
        .update_metadata(&depositor, &deposition.srn, json!({"title": "Spectra"}))
        .await?;
    deposition_service
        .upload_file(&depositor, &deposition.srn, "data.csv", b"a,b\n1,2\n", Some("text/csv"))
        .await?;
    deposition_service.submit(&depositor, &deposition.srn).await?;

    // -- drain the event chain ----------------------------------------------
    drain(&workers).await;

    // Exactly one record, linked to the original deposition.
    let published = records.all();
    assert_eq!(published.len(), 1, "exactly one record must be published");
    assert_eq!(published[0].deposition_srn, deposition.srn);
    assert_eq!(published[0].metadata, json!({"title": "Spectra"}));
    assert_eq!(published[0].srn.record_version(), 1);

    // The deposition reached its terminal accepted state with the record
    // SRN linked back.
    let final_deposition = depositions.get(&deposition.srn).await?.expect("deposition");
    assert_eq!(final_deposition.status, DepositionStatus::Accepted);
    assert_eq!(final_deposition.record_srn.as_ref(), Some(&published[0].srn));

    // Both backends were fed exactly once.
    assert_eq!(vector.batch_calls(), 1, "vector ingest_batch called once");
    assert_eq!(vector.documents().len(), 1);
    assert_eq!(keyword.documents().len(), 1);

    // Every delivery in the system reached a delivered state — nothing is
    // stuck, nothing failed.
    let deliveries = repo.all_deliveries().await;
    assert!(!deliveries.is_empty());
    assert!(
        deliveries.iter().all(|d| d.status == DeliveryStatus::Delivered),
        "all deliveries must be delivered, got: {deliveries:?}"
    );

    // Owner-scoped listing and file download read the same state.
    let (mine, total) = deposition_service.list_depositions(Some("u-1"), 10, 0).await?;
    assert_eq!(total, 1);
    assert_eq!(mine.len(), 1);
    let (other, total) = deposition_service
        .list_depositions(Some("someone-else"), 10, 0)
        .await?;
    assert_eq!(total, 0);
    assert!(other.is_empty());

    let (content, file) = deposition_service
        .download_file(&deposition.srn, "data.csv")
        .await?;
    assert_eq!(content, b"a,b\n1,2\n");
    assert_eq!(file.content_type.as_deref(), Some("text/csv"));

    // Replaying the chain produces no further work.
    drain(&workers).await;
    assert_eq!(records.all().len(), 1);
    Ok(())
}
