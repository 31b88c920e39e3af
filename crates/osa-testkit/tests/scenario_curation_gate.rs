//! Scenario: the curation gate between validation and publication.
//!
//! Auto-approval only fires for passed validations of conventions that do
//! not require manual curation; everything else leaves the deposition
//! waiting without failing any delivery.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use osa_events::delivery::DeliveryStatus;
use osa_events::events::{ValidationCompleted, ValidationStatus};
use osa_events::handler::TypedHandler;
use osa_events::outbox::Outbox;
use osa_events::subscription::SubscriptionRegistry;
use osa_pipeline::curation::AutoApproveCuration;
use osa_srn::{DepositionSrn, ValidationRunSrn};
use osa_testkit::fixtures::{bare_convention, NODE_DOMAIN};
use osa_testkit::{MemoryConventionRepository, MemoryEventRepository, MemoryRuntime};
use osa_worker::Worker;

struct Fixture {
    repo: Arc<MemoryEventRepository>,
    outbox: Arc<Outbox>,
    conventions: Arc<MemoryConventionRepository>,
    worker: Worker,
}

fn fixture() -> Fixture {
    let conventions = Arc::new(MemoryConventionRepository::new());

    let config = AutoApproveCuration::worker_config();
    let mut subscriptions = SubscriptionRegistry::new();
    subscriptions.subscribe(&config.event_type, &config.name, None);

    let repo = Arc::new(MemoryEventRepository::new());
    let outbox = Arc::new(Outbox::new(repo.clone(), Arc::new(subscriptions)));

    let worker = Worker::new(
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
    );

    Fixture {
        repo,
        outbox,
        conventions,
        worker,
    }
}

fn completed_event(convention: &osa_domain::convention::Convention, status: ValidationStatus) -> ValidationCompleted {
    ValidationCompleted {
        id: Uuid::new_v4(),
        validation_run_srn: ValidationRunSrn::new(NODE_DOMAIN, &Uuid::new_v4().to_string()).unwrap(),
        deposition_srn: DepositionSrn::new(NODE_DOMAIN, &Uuid::new_v4().to_string()).unwrap(),
        convention_srn: convention.srn.clone(),
        status,
        hook_results: vec![],
        metadata: json!({"title": "T"}),
        hooks: vec![],
        files_dir: String::new(),
    }
}

#[tokio::test]
async fn passed_validation_without_manual_curation_is_approved() -> anyhow::Result<()> {
    let fx = fixture();
    let convention = bare_convention("auto-approve");
    fx.conventions.insert(convention.clone());

    let event = completed_event(&convention, ValidationStatus::Completed);
    fx.outbox.append(&event).await?;

    assert!(fx.worker.poll_once().await);

    let approved = fx
        .outbox
        .count_events(Some(&["DepositionApproved".to_string()]))
        .await?;
    assert_eq!(approved, 1, "auto-approval must emit DepositionApproved");

    let delivery = fx.repo.deliveries_for_event(event.id).await.remove(0);
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    Ok(())
}

#[tokio::test]
async fn manual_curation_convention_waits_for_a_curator() -> anyhow::Result<()> {
    let fx = fixture();
    let mut convention = bare_convention("manual-curation");
    convention.requires_manual_curation = true;
    fx.conventions.insert(convention.clone());

    let event = completed_event(&convention, ValidationStatus::Completed);
    fx.outbox.append(&event).await?;

    assert!(fx.worker.poll_once().await);

    let approved = fx
        .outbox
        .count_events(Some(&["DepositionApproved".to_string()]))
        .await?;
    assert_eq!(approved, 0, "manual curation must block auto-approval");

    // The handler completed; waiting is not an error.
    let delivery = fx.repo.deliveries_for_event(event.id).await.remove(0);
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    Ok(())
}

#[tokio::test]
async fn non_passing_validation_is_never_approved() -> anyhow::Result<()> {
    let fx = fixture();
    let convention = bare_convention("strict");
    fx.conventions.insert(convention.clone());

    let event = completed_event(&convention, ValidationStatus::Failed);
    fx.outbox.append(&event).await?;

    assert!(fx.worker.poll_once().await);

    let approved = fx
        .outbox
        .count_events(Some(&["DepositionApproved".to_string()]))
        .await?;
    assert_eq!(approved, 0);
    Ok(())
}

#[tokio::test]
async fn curator_approval_emits_the_same_enriched_event() -> anyhow::Result<()> {
    use chrono::Utc;
    use osa_domain::deposition::Deposition;
    use osa_domain::identity::{Identity, Role};
    use osa_domain::ports::DepositionRepository;
    use osa_events::events::DepositionApproved;
    use osa_pipeline::curation::CurationService;
    use osa_storage::LocalFileStorage;
    use osa_testkit::fixtures::convention_with_hook;
    use osa_testkit::MemoryDepositionRepository;

    let tmp = tempfile::tempdir()?;
    let storage = Arc::new(LocalFileStorage::new(tmp.path()));
    let depositions = Arc::new(MemoryDepositionRepository::new());
    let conventions = Arc::new(MemoryConventionRepository::new());

    let convention = convention_with_hook("curated");
    conventions.insert(convention.clone());

    let mut deposition = Deposition::new(
        DepositionSrn::new(NODE_DOMAIN, &Uuid::new_v4().to_string())?,
        convention.srn.clone(),
        "u-1".to_string(),
        Utc::now(),
    );
    deposition.metadata = json!({"title": "Curated"});
    deposition.submit(Utc::now())?;
    depositions.save(&deposition).await?;

    let repo = Arc::new(MemoryEventRepository::new());
    let outbox = Arc::new(Outbox::new(repo, Arc::new(SubscriptionRegistry::new())));
    let service = CurationService::new(
        depositions.clone(),
        conventions.clone(),
        storage,
        outbox.clone(),
    );

    // Depositors cannot decide curation.
    let depositor = Identity::User {
        id: "u-1".to_string(),
        role: Role::Depositor,
    };
    assert!(service.approve(&depositor, &deposition.srn).await.is_err());

    let curator = Identity::User {
        id: "c-1".to_string(),
        role: Role::Curator,
    };
    service.approve(&curator, &deposition.srn).await?;

    let approved: DepositionApproved = outbox.find_latest().await?.expect("approved event");
    assert_eq!(approved.deposition_srn, deposition.srn);
    assert_eq!(approved.metadata, json!({"title": "Curated"}));
    assert_eq!(approved.hooks.len(), 1, "hook snapshots travel with the approval");
    Ok(())
}

#[tokio::test]
async fn curator_rejection_is_terminal() -> anyhow::Result<()> {
    use chrono::Utc;
    use osa_domain::deposition::{Deposition, DepositionStatus};
    use osa_domain::identity::{Identity, Role};
    use osa_domain::ports::DepositionRepository;
    use osa_pipeline::curation::CurationService;
    use osa_storage::LocalFileStorage;
    use osa_testkit::MemoryDepositionRepository;

    let tmp = tempfile::tempdir()?;
    let storage = Arc::new(LocalFileStorage::new(tmp.path()));
    let depositions = Arc::new(MemoryDepositionRepository::new());
    let conventions = Arc::new(MemoryConventionRepository::new());
    let convention = bare_convention("reject-template");
    conventions.insert(convention.clone());

    let mut deposition = Deposition::new(
        DepositionSrn::new(NODE_DOMAIN, &Uuid::new_v4().to_string())?,
        convention.srn.clone(),
        "u-2".to_string(),
        Utc::now(),
    );
    deposition.submit(Utc::now())?;
    depositions.save(&deposition).await?;

    let repo = Arc::new(MemoryEventRepository::new());
    let outbox = Arc::new(Outbox::new(repo, Arc::new(SubscriptionRegistry::new())));
    let service = CurationService::new(
        depositions.clone(),
        conventions,
        storage,
        outbox,
    );

    let curator = Identity::User {
        id: "c-2".to_string(),
        role: Role::Curator,
    };
    let rejected = service.reject(&curator, &deposition.srn).await?;
    assert_eq!(rejected.status, DepositionStatus::Rejected);

    // Terminal: a second decision is an error.
    assert!(service.reject(&curator, &deposition.srn).await.is_err());
    assert!(service.approve(&curator, &deposition.srn).await.is_err());
    Ok(())
}
