//! Handler wiring: the explicit `HANDLERS`-style list and the per-cycle
//! scope factory.
//!
//! Each registration bundles a handler's `WorkerConfig`, its authorization
//! gate and a build closure. `begin` opens a fresh Postgres unit of work and
//! invokes the closure with repositories bound to that transaction, so a
//! handler's business writes and outbox appends commit together.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use osa_db::{
    PgConventionRepository, PgDepositionRepository, PgFeatureStore, PgRecordRepository,
    PgUnitOfWork, TxEventRepository,
};
use osa_domain::identity::{AuthPolicy, Identity};
use osa_domain::ports::{
    ConventionRepository, DepositionRepository, FeatureStore, FileStorage, RecordRepository,
};
use osa_events::handler::{EventHandler, TypedHandler};
use osa_events::outbox::Outbox;
use osa_events::subscription::SubscriptionRegistry;
use osa_events::worker_config::WorkerConfig;
use osa_index::IndexRegistry;
use osa_pipeline::curation::AutoApproveCuration;
use osa_pipeline::deposition::{CreateDepositionFromSource, DepositionService, ReturnToDraft};
use osa_pipeline::feature::{CreateFeatureTables, FeatureService, InsertRecordFeatures};
use osa_pipeline::index::{
    FanOutToIndexBackends, FlushIndexesOnSourceComplete, KeywordIndexHandler, VectorIndexHandler,
};
use osa_pipeline::record::{ConvertDepositionToRecord, RecordService};
use osa_pipeline::runner::{ContainerRunner, ContainerSpec, RunnerInputs, RunnerOutput};
use osa_pipeline::source::{
    PullFromSource, SourceService, TriggerInitialSourceRun, TriggerSourceOnStartup,
};
use osa_pipeline::validation::{ValidateDeposition, ValidationService};
use osa_worker::{HandlerRuntime, HandlerScope};

// ---------------------------------------------------------------------------
// Shared services
// ---------------------------------------------------------------------------

/// Process-wide services every handler scope is built from.
pub struct SharedServices {
    pub pool: PgPool,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub storage: Arc<dyn FileStorage>,
    pub runner: Arc<dyn ContainerRunner>,
    pub indexes: IndexRegistry,
    pub node_domain: String,
}

/// Services bound to one unit of work.
pub struct ScopeServices {
    pub uow: Arc<PgUnitOfWork>,
    pub outbox: Arc<Outbox>,
    pub depositions: Arc<dyn DepositionRepository>,
    pub conventions: Arc<dyn ConventionRepository>,
    pub records: Arc<dyn RecordRepository>,
    pub features: Arc<dyn FeatureStore>,
    pub storage: Arc<dyn FileStorage>,
    pub runner: Arc<dyn ContainerRunner>,
    pub indexes: IndexRegistry,
    pub node_domain: String,
}

impl ScopeServices {
    fn new(shared: &SharedServices, uow: Arc<PgUnitOfWork>) -> Self {
        let tx_repo = Arc::new(TxEventRepository::new(uow.clone()));
        let outbox = Arc::new(Outbox::new(tx_repo, shared.subscriptions.clone()));
        ScopeServices {
            depositions: Arc::new(PgDepositionRepository::new(uow.clone())),
            conventions: Arc::new(PgConventionRepository::new(uow.clone())),
            records: Arc::new(PgRecordRepository::new(uow.clone())),
            features: Arc::new(PgFeatureStore::new(uow.clone())),
            storage: shared.storage.clone(),
            runner: shared.runner.clone(),
            indexes: shared.indexes.clone(),
            node_domain: shared.node_domain.clone(),
            outbox,
            uow,
        }
    }

    fn deposition_service(&self) -> Arc<DepositionService> {
        Arc::new(DepositionService::new(
            self.depositions.clone(),
            self.conventions.clone(),
            self.storage.clone(),
            self.outbox.clone(),
            self.node_domain.clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Registration plumbing
// ---------------------------------------------------------------------------

type BuildFn = Box<dyn Fn(&ScopeServices) -> Box<dyn EventHandler> + Send + Sync>;

struct PgHandlerRuntime {
    config: WorkerConfig,
    auth: AuthPolicy,
    shared: Arc<SharedServices>,
    build: BuildFn,
}

#[async_trait]
impl HandlerRuntime for PgHandlerRuntime {
    fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn auth(&self) -> &AuthPolicy {
        &self.auth
    }

    async fn begin(&self, identity: Identity) -> Result<Box<dyn HandlerScope>> {
        let uow = PgUnitOfWork::begin(&self.shared.pool, identity).await?;
        let services = ScopeServices::new(&self.shared, uow.clone());
        let handler = (self.build)(&services);
        Ok(Box::new(PgHandlerScope { uow, handler }))
    }
}

struct PgHandlerScope {
    uow: Arc<PgUnitOfWork>,
    handler: Box<dyn EventHandler>,
}

#[async_trait]
impl HandlerScope for PgHandlerScope {
    fn handler(&self) -> &dyn EventHandler {
        self.handler.as_ref()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.uow.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.uow.rollback().await
    }
}

fn registration(
    shared: &Arc<SharedServices>,
    config: WorkerConfig,
    auth: AuthPolicy,
    build: BuildFn,
) -> Arc<dyn HandlerRuntime> {
    Arc::new(PgHandlerRuntime {
        config,
        auth,
        shared: shared.clone(),
        build,
    })
}

/// The subscription registry derived from every handler's worker config.
/// Built before the outbox so routing-filtered subscribers only receive
/// matching deliveries.
pub fn build_subscription_registry() -> SubscriptionRegistry {
    let mut registry = SubscriptionRegistry::new();
    for config in handler_configs() {
        registry.subscribe(&config.event_type, &config.name, config.routing_key.as_deref());
    }
    registry
}

fn handler_configs() -> Vec<WorkerConfig> {
    vec![
        PullFromSource::worker_config(),
        CreateDepositionFromSource::worker_config(),
        ValidateDeposition::worker_config(),
        AutoApproveCuration::worker_config(),
        ConvertDepositionToRecord::worker_config(),
        FanOutToIndexBackends::worker_config(),
        InsertRecordFeatures::worker_config(),
        VectorIndexHandler::worker_config(),
        KeywordIndexHandler::worker_config(),
        ReturnToDraft::worker_config(),
        CreateFeatureTables::worker_config(),
        TriggerInitialSourceRun::worker_config(),
        TriggerSourceOnStartup::worker_config(),
        FlushIndexesOnSourceComplete::worker_config(),
    ]
}

/// The full handler list — the single place a new pipeline handler is
/// added.
pub fn handler_registrations(shared: &Arc<SharedServices>) -> Vec<Arc<dyn HandlerRuntime>> {
    vec![
        registration(
            shared,
            PullFromSource::worker_config(),
            PullFromSource::auth(),
            Box::new(|s| {
                let service = Arc::new(SourceService::new(
                    s.conventions.clone(),
                    s.storage.clone(),
                    s.runner.clone(),
                    s.outbox.clone(),
                ));
                Box::new(TypedHandler::new(PullFromSource { service }, false))
            }),
        ),
        registration(
            shared,
            CreateDepositionFromSource::worker_config(),
            CreateDepositionFromSource::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    CreateDepositionFromSource {
                        service: s.deposition_service(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            ValidateDeposition::worker_config(),
            ValidateDeposition::auth(),
            Box::new(|s| {
                let service = Arc::new(ValidationService::new(
                    s.storage.clone(),
                    s.runner.clone(),
                    s.node_domain.clone(),
                ));
                Box::new(TypedHandler::new(
                    ValidateDeposition {
                        service,
                        outbox: s.outbox.clone(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            AutoApproveCuration::worker_config(),
            AutoApproveCuration::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    AutoApproveCuration {
                        conventions: s.conventions.clone(),
                        outbox: s.outbox.clone(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            ConvertDepositionToRecord::worker_config(),
            ConvertDepositionToRecord::auth(),
            Box::new(|s| {
                let service = Arc::new(RecordService::new(
                    s.records.clone(),
                    s.depositions.clone(),
                    s.outbox.clone(),
                    s.node_domain.clone(),
                ));
                Box::new(TypedHandler::new(ConvertDepositionToRecord { service }, false))
            }),
        ),
        registration(
            shared,
            FanOutToIndexBackends::worker_config(),
            FanOutToIndexBackends::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    FanOutToIndexBackends {
                        indexes: s.indexes.clone(),
                        outbox: s.outbox.clone(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            InsertRecordFeatures::worker_config(),
            InsertRecordFeatures::auth(),
            Box::new(|s| {
                let service = Arc::new(FeatureService::new(s.features.clone(), s.storage.clone()));
                Box::new(TypedHandler::new(InsertRecordFeatures { service }, false))
            }),
        ),
        registration(
            shared,
            VectorIndexHandler::worker_config(),
            VectorIndexHandler::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    VectorIndexHandler {
                        indexes: s.indexes.clone(),
                    },
                    true,
                ))
            }),
        ),
        registration(
            shared,
            KeywordIndexHandler::worker_config(),
            KeywordIndexHandler::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    KeywordIndexHandler {
                        indexes: s.indexes.clone(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            ReturnToDraft::worker_config(),
            ReturnToDraft::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    ReturnToDraft {
                        service: s.deposition_service(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            CreateFeatureTables::worker_config(),
            CreateFeatureTables::auth(),
            Box::new(|s| {
                let service = Arc::new(FeatureService::new(s.features.clone(), s.storage.clone()));
                Box::new(TypedHandler::new(
                    CreateFeatureTables {
                        service,
                        outbox: s.outbox.clone(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            TriggerInitialSourceRun::worker_config(),
            TriggerInitialSourceRun::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    TriggerInitialSourceRun {
                        conventions: s.conventions.clone(),
                        outbox: s.outbox.clone(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            TriggerSourceOnStartup::worker_config(),
            TriggerSourceOnStartup::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    TriggerSourceOnStartup {
                        conventions: s.conventions.clone(),
                        outbox: s.outbox.clone(),
                    },
                    false,
                ))
            }),
        ),
        registration(
            shared,
            FlushIndexesOnSourceComplete::worker_config(),
            FlushIndexesOnSourceComplete::auth(),
            Box::new(|s| {
                Box::new(TypedHandler::new(
                    FlushIndexesOnSourceComplete {
                        indexes: s.indexes.clone(),
                    },
                    false,
                ))
            }),
        ),
    ]
}

// ---------------------------------------------------------------------------
// NullContainerRunner
// ---------------------------------------------------------------------------

/// Placeholder runner wired until a container runtime adapter (docker,
/// podman) is configured. Every invocation fails, which sends the
/// triggering delivery through the normal retry-then-failed path.
#[derive(Debug, Default, Clone)]
pub struct NullContainerRunner;

#[async_trait]
impl ContainerRunner for NullContainerRunner {
    async fn run(
        &self,
        spec: &ContainerSpec,
        _inputs: &RunnerInputs,
        _files_dir: &std::path::Path,
        _work_dir: &std::path::Path,
    ) -> Result<RunnerOutput> {
        anyhow::bail!("no container runtime configured (requested image: {})", spec.image)
    }
}
