//! WorkerPool: owns the workers, the stale-claim janitor and the cron
//! scheduler. Lifecycle is tied to the server process: `start` launches
//! everything, `stop(timeout)` signals cooperative shutdown, waits, and
//! aborts whatever is left.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use osa_events::events::ServerStarted;
use osa_events::outbox::Outbox;
use osa_events::registry::EventTypeRegistry;
use osa_events::worker_config::WorkerState;

use crate::registration::{validate_registrations, HandlerRuntime, StartupError};
use crate::scheduler::{run_schedule_loop, ScheduleRegistration};
use crate::worker::Worker;

pub struct WorkerPool {
    /// Pool-level outbox: ServerStarted emission and stale-claim resets.
    outbox: Arc<Outbox>,
    workers: Vec<Arc<Worker>>,
    schedules: Vec<ScheduleRegistration>,
    stale_claim_interval: Duration,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl WorkerPool {
    /// Validate the registrations and build one worker per handler.
    ///
    /// # Errors
    /// Any [`StartupError`]: invalid worker config, duplicate consumer
    /// group, or subscription to an unregistered event type.
    pub fn new(
        outbox: Arc<Outbox>,
        registrations: Vec<Arc<dyn HandlerRuntime>>,
        registry: &EventTypeRegistry,
        schedules: Vec<ScheduleRegistration>,
        stale_claim_interval: Duration,
    ) -> Result<Self, StartupError> {
        validate_registrations(&registrations, registry)?;

        let workers = registrations
            .into_iter()
            .map(|registration| Arc::new(Worker::new(registration, outbox.clone())))
            .collect();

        let (shutdown, _) = watch::channel(false);
        Ok(WorkerPool {
            outbox,
            workers,
            schedules,
            stale_claim_interval,
            shutdown,
            tasks: Vec::new(),
            started: false,
        })
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Per-worker state snapshots for the status surface.
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .iter()
            .map(|w| (w.name().to_string(), w.state_snapshot()))
            .collect()
    }

    /// Emit `ServerStarted`, then launch every worker, the schedules and
    /// the janitor.
    pub async fn start(&mut self) -> Result<()> {
        anyhow::ensure!(!self.started, "worker pool already started");
        self.started = true;
        let _ = self.shutdown.send(false);

        self.emit_server_started().await?;

        for worker in &self.workers {
            let task = tokio::spawn(worker.clone().run(self.shutdown.subscribe()));
            self.tasks.push(task);
        }

        for registration in self.schedules.drain(..) {
            let task = tokio::spawn(run_schedule_loop(registration, self.shutdown.subscribe()));
            self.tasks.push(task);
        }

        if !self.stale_claim_interval.is_zero() {
            let max_claim_timeout = self
                .workers
                .iter()
                .map(|w| w.config().claim_timeout)
                .max()
                .unwrap_or(Duration::from_secs(300));
            let task = tokio::spawn(run_janitor(
                self.outbox.clone(),
                self.stale_claim_interval,
                max_claim_timeout,
                self.shutdown.subscribe(),
            ));
            self.tasks.push(task);
        }

        info!(workers = self.workers.len(), "worker pool started");
        Ok(())
    }

    async fn emit_server_started(&self) -> Result<()> {
        let event = ServerStarted { id: Uuid::new_v4() };
        self.outbox
            .append(&event)
            .await
            .context("emit ServerStarted")?;
        info!("ServerStarted event emitted");
        Ok(())
    }

    /// Signal shutdown, wait for tasks up to `timeout`, abort stragglers.
    /// Workers finish their in-flight batch before exiting.
    pub async fn stop(&mut self, timeout: Duration) {
        let _ = self.shutdown.send(true);

        let deadline = tokio::time::Instant::now() + timeout;
        for mut task in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) if join_err.is_panic() => {
                    error!(error = %join_err, "pool task panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => task.abort(),
            }
        }
        self.started = false;
        info!("worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("started", &self.started)
            .finish()
    }
}

/// Periodically return stale `claimed` deliveries to `pending`, so work
/// claimed by a crashed or wedged worker is picked up again.
async fn run_janitor(
    outbox: Arc<Outbox>,
    interval: Duration,
    claim_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs(),
        claim_timeout_secs = claim_timeout.as_secs(),
        "stale-claim janitor started"
    );
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        match outbox.reset_stale_claims(claim_timeout).await {
            Ok(0) => {}
            Ok(count) => info!(count, "reset stale claims"),
            Err(err) => error!(error = %format!("{err:#}"), "stale claim cleanup failed"),
        }
    }
    info!("stale-claim janitor stopped");
}
