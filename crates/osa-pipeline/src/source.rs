//! Source domain: running upstream pull containers and fanning their
//! records into the deposition pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use osa_domain::identity::{AuthPolicy, Identity};
use osa_domain::ports::{ConventionRepository, FileStorage};
use osa_events::events::{ServerStarted, SourceRecordReady, SourceRequested, SourceRunCompleted};
use osa_events::handler::{HandlerError, HandlerResult, Handles};
use osa_events::outbox::Outbox;
use osa_events::schedule::Schedule;
use osa_events::worker_config::WorkerConfig;
use osa_events::{ConventionReady, DomainEvent};
use osa_srn::ConventionSrn;

use crate::runner::{ContainerRunner, ContainerSpec, RunnerInputs};

// ---------------------------------------------------------------------------
// SourceService
// ---------------------------------------------------------------------------

/// Outcome of a source run request.
#[derive(Debug)]
pub enum RunOutcome {
    /// The convention declares no source; the request cannot ever succeed.
    NoSource,
    Completed {
        record_count: i64,
        is_final_chunk: bool,
    },
}

/// Orchestrates source container runs.
///
/// For every record the container produces, a `SourceRecordReady` event is
/// appended; the deposition domain turns those into depositions. The
/// service never touches deposition state itself.
pub struct SourceService {
    conventions: Arc<dyn ConventionRepository>,
    storage: Arc<dyn FileStorage>,
    runner: Arc<dyn ContainerRunner>,
    outbox: Arc<Outbox>,
}

impl SourceService {
    pub fn new(
        conventions: Arc<dyn ConventionRepository>,
        storage: Arc<dyn FileStorage>,
        runner: Arc<dyn ContainerRunner>,
        outbox: Arc<Outbox>,
    ) -> Self {
        SourceService {
            conventions,
            storage,
            runner,
            outbox,
        }
    }

    /// Run one chunk of a source pull and emit the resulting events.
    pub async fn run_source(&self, request: &SourceRequested) -> Result<RunOutcome> {
        let convention = self
            .conventions
            .get(&request.convention_srn)
            .await?
            .with_context(|| format!("convention not found: {}", request.convention_srn))?;

        let source = match &convention.source {
            Some(source) => source.clone(),
            None => return Ok(RunOutcome::NoSource),
        };

        let started_at = Utc::now();
        let run_id = short_run_id();
        info!(
            convention = %request.convention_srn,
            run = %run_id,
            offset = request.offset,
            "starting source run"
        );

        let staging_dir = self.storage.staging_dir(&request.convention_srn, &run_id);
        let work_dir = self.storage.output_dir(&request.convention_srn, &run_id);

        let inputs = RunnerInputs {
            config: source.config.clone(),
            since: request.since,
            limit: request.limit,
            offset: request.offset,
            session: request.session.clone(),
        };

        let output = self
            .runner
            .run(&ContainerSpec::for_source(&source), &inputs, &staging_dir, &work_dir)
            .await
            .context("source container run failed")?;

        let mut count: i64 = 0;
        for record in &output.records {
            self.outbox
                .append(&SourceRecordReady {
                    id: Uuid::new_v4(),
                    convention_srn: request.convention_srn.clone(),
                    metadata: record.metadata.clone(),
                    file_paths: record.file_paths.clone(),
                    source_id: record.source_id.clone(),
                    staging_dir: staging_dir.to_string_lossy().into_owned(),
                })
                .await?;
            count += 1;
        }

        let completed_at = Utc::now();
        let is_final_chunk = output.session.is_none() || count == 0;

        // Continuation chunk while the runner reports more data.
        if !is_final_chunk {
            let next_offset = request.offset + count;
            debug!(convention = %request.convention_srn, next_offset, "emitting continuation");
            self.outbox
                .append(&SourceRequested {
                    id: Uuid::new_v4(),
                    convention_srn: request.convention_srn.clone(),
                    since: request.since,
                    limit: request.limit,
                    offset: next_offset,
                    chunk_size: request.chunk_size,
                    session: output.session.clone(),
                })
                .await?;
        }

        self.outbox
            .append(&SourceRunCompleted {
                id: Uuid::new_v4(),
                convention_srn: request.convention_srn.clone(),
                started_at,
                completed_at,
                record_count: count,
                is_final_chunk,
            })
            .await?;

        info!(
            convention = %request.convention_srn,
            run = %run_id,
            records = count,
            is_final_chunk,
            "source run completed"
        );
        Ok(RunOutcome::Completed {
            record_count: count,
            is_final_chunk,
        })
    }
}

fn short_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

// ---------------------------------------------------------------------------
// PullFromSource
// ---------------------------------------------------------------------------

/// Handles `SourceRequested`: runs the source container and emits per-record
/// events plus the run-completed marker.
pub struct PullFromSource {
    pub service: Arc<SourceService>,
}

impl PullFromSource {
    pub fn worker_config() -> WorkerConfig {
        let mut config = WorkerConfig::single("PullFromSource", SourceRequested::EVENT_TYPE);
        // Container pulls are slow; give the claim plenty of headroom.
        config.claim_timeout = Duration::from_secs(1800);
        config.poll_interval = Duration::from_secs(5);
        config
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<SourceRequested> for PullFromSource {
    async fn handle(&self, event: SourceRequested) -> HandlerResult {
        match self.service.run_source(&event).await? {
            RunOutcome::NoSource => Err(HandlerError::skipped(
                vec![event.id],
                format!("convention has no source: {}", event.convention_srn),
            )),
            RunOutcome::Completed { .. } => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerInitialSourceRun
// ---------------------------------------------------------------------------

/// Handles `ConventionReady`: kicks off the initial pull for conventions
/// that declare one, now that feature tables exist.
pub struct TriggerInitialSourceRun {
    pub conventions: Arc<dyn ConventionRepository>,
    pub outbox: Arc<Outbox>,
}

impl TriggerInitialSourceRun {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("TriggerInitialSourceRun", ConventionReady::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<ConventionReady> for TriggerInitialSourceRun {
    async fn handle(&self, event: ConventionReady) -> HandlerResult {
        let convention = self
            .conventions
            .get(&event.convention_srn)
            .await?
            .with_context(|| format!("convention not found: {}", event.convention_srn))?;

        let initial_run = match convention.source.as_ref().and_then(|s| s.initial_run.as_ref()) {
            Some(initial_run) => initial_run,
            None => return Ok(()),
        };

        info!(convention = %convention.srn, "triggering initial source run");
        self.outbox
            .append(&SourceRequested {
                limit: initial_run.limit,
                ..SourceRequested::new(convention.srn.clone())
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TriggerSourceOnStartup
// ---------------------------------------------------------------------------

/// Handles `ServerStarted`: for every convention with an initial run that
/// has never completed a pull, emit a `SourceRequested`. Covers nodes whose
/// conventions were registered while the pool was down.
pub struct TriggerSourceOnStartup {
    pub conventions: Arc<dyn ConventionRepository>,
    pub outbox: Arc<Outbox>,
}

impl TriggerSourceOnStartup {
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::single("TriggerSourceOnStartup", ServerStarted::EVENT_TYPE)
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<ServerStarted> for TriggerSourceOnStartup {
    async fn handle(&self, _event: ServerStarted) -> HandlerResult {
        for convention in self.conventions.list().await? {
            let initial_run = match convention.source.as_ref().and_then(|s| s.initial_run.as_ref()) {
                Some(initial_run) => initial_run,
                None => continue,
            };

            let already_ran = self
                .outbox
                .find_latest_where::<SourceRunCompleted>(
                    "convention_srn",
                    &convention.srn.render(),
                )
                .await?
                .is_some();
            if already_ran {
                continue;
            }

            info!(convention = %convention.srn, "startup source trigger");
            self.outbox
                .append(&SourceRequested {
                    limit: initial_run.limit,
                    ..SourceRequested::new(convention.srn.clone())
                })
                .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SourceSchedule
// ---------------------------------------------------------------------------

/// Cron task emitting `SourceRequested` for a convention, with `since`
/// derived from the last completed run.
pub struct SourceSchedule {
    pub outbox: Arc<Outbox>,
}

#[async_trait]
impl Schedule for SourceSchedule {
    async fn run(&self, params: &Value) -> Result<()> {
        let convention = params
            .get("convention")
            .and_then(Value::as_str)
            .context("schedule params missing 'convention'")?;
        let convention_srn = ConventionSrn::parse(convention)?;
        let limit = params.get("limit").and_then(Value::as_i64);

        let since: Option<DateTime<Utc>> = self
            .outbox
            .find_latest_where::<SourceRunCompleted>("convention_srn", convention)
            .await?
            .map(|last| last.completed_at);

        info!(convention = %convention_srn, ?since, ?limit, "scheduled source run");
        self.outbox
            .append(&SourceRequested {
                since,
                limit,
                ..SourceRequested::new(convention_srn)
            })
            .await?;
        Ok(())
    }
}
