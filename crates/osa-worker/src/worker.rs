//! The worker poll loop.
//!
//! # State machine
//!
//! ```text
//! idle → claiming → processing → idle
//! any  → stopping → (exited)
//! ```
//!
//! # Poll cycle
//!
//! 1. Claim up to `batch_size` deliveries for this consumer group (its own
//!    short transaction — a committed claim is visible to every process).
//! 2. Open a unit-of-work scope under the System identity and build the
//!    handler with repositories bound to that transaction.
//! 3. Run the handler; pattern-match the outcome:
//!    - `Ok` — commit the scope, mark every delivery `delivered`.
//!    - `Skipped` — commit, mark the listed events `skipped` and the rest
//!      `delivered`.
//!    - anything else — roll back, `mark_failed_with_retry` every delivery.
//!
//! Errors never escape the loop; a failed cycle is recorded in the worker
//! state and the next poll proceeds.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use osa_domain::identity::Identity;
use osa_events::delivery::ClaimResult;
use osa_events::handler::HandlerError;
use osa_events::outbox::Outbox;
use osa_events::worker_config::{WorkerConfig, WorkerState, WorkerStatus};

use crate::registration::HandlerRuntime;

pub struct Worker {
    config: WorkerConfig,
    runtime: Arc<dyn HandlerRuntime>,
    /// Pool-level outbox for the claim/ack path; every call is one short
    /// transaction.
    outbox: Arc<Outbox>,
    state: Arc<Mutex<WorkerState>>,
}

impl Worker {
    pub fn new(runtime: Arc<dyn HandlerRuntime>, outbox: Arc<Outbox>) -> Self {
        Worker {
            config: runtime.config().clone(),
            runtime,
            outbox,
            state: Arc::new(Mutex::new(WorkerState::new())),
        }
    }

    /// Worker name == consumer group.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Shared handle for the status surface.
    pub fn state_handle(&self) -> Arc<Mutex<WorkerState>> {
        self.state.clone()
    }

    pub fn state_snapshot(&self) -> WorkerState {
        self.state.lock().expect("worker state poisoned").clone()
    }

    fn with_state(&self, f: impl FnOnce(&mut WorkerState)) {
        let mut state = self.state.lock().expect("worker state poisoned");
        f(&mut state);
    }

    /// Execute one poll cycle. Returns `true` when a batch was processed
    /// (successfully or not), `false` when there was no work.
    pub async fn poll_once(&self) -> bool {
        self.with_state(|s| s.status = WorkerStatus::Claiming);

        let claim = match self
            .outbox
            .claim(
                std::slice::from_ref(&self.config.event_type),
                self.config.batch_size as i64,
                &self.config.name,
            )
            .await
        {
            Ok(claim) => claim,
            Err(err) => {
                warn!(worker = %self.config.name, error = %format!("{err:#}"), "claim failed");
                self.with_state(|s| {
                    s.status = WorkerStatus::Idle;
                    s.last_error = Some(format!("claim: {err:#}"));
                });
                return false;
            }
        };

        if claim.is_empty() {
            self.with_state(|s| s.status = WorkerStatus::Idle);
            return false;
        }

        let claimed_at = claim.claimed_at;
        self.with_state(|s| {
            s.status = WorkerStatus::Processing;
            s.current_batch = claim.events.iter().map(|e| e.event_id()).collect();
            s.last_claim_at = Some(claimed_at);
        });

        self.process_batch(&claim, claimed_at).await;

        self.with_state(|s| {
            s.current_batch.clear();
            s.status = WorkerStatus::Idle;
        });
        true
    }

    async fn process_batch(&self, claim: &ClaimResult, _claimed_at: DateTime<Utc>) {
        // Outer authorization gate. Workers run as System, which satisfies
        // any policy; the check still runs so a registration invoked from
        // another surface goes through the same executor.
        if let Err(err) = self.runtime.auth().authorize(&Identity::System) {
            self.fail_batch(claim, &format!("authorization: {err}")).await;
            return;
        }

        let scope = match self.runtime.begin(Identity::System).await {
            Ok(scope) => scope,
            Err(err) => {
                // Could not even open the scope; requeue the whole batch.
                self.fail_batch(claim, &format!("begin unit of work: {err:#}")).await;
                return;
            }
        };

        match scope.handler().handle_batch(&claim.events).await {
            Ok(()) => {
                if let Err(err) = scope.commit().await {
                    self.fail_batch(claim, &format!("commit: {err:#}")).await;
                    return;
                }
                for event in &claim.events {
                    self.ack(self.outbox.mark_delivered(event.delivery_id).await, "delivered");
                }
                self.with_state(|s| s.processed_count += claim.events.len() as u64);
                debug!(
                    worker = %self.config.name,
                    batch = claim.events.len(),
                    "batch delivered"
                );
            }

            Err(HandlerError::Skipped { event_ids, reason }) => {
                // Skips are acknowledged state, not failures: the handler may
                // have done partial work for the rest of the batch, so the
                // scope still commits.
                if let Err(err) = scope.commit().await {
                    self.fail_batch(claim, &format!("commit after skip: {err:#}")).await;
                    return;
                }
                warn!(
                    worker = %self.config.name,
                    skipped = event_ids.len(),
                    %reason,
                    "skipping events"
                );
                let skipped: HashSet<_> = event_ids.into_iter().collect();
                let mut delivered = 0u64;
                for event in &claim.events {
                    if skipped.contains(&event.event_id()) {
                        self.ack(
                            self.outbox.mark_skipped(event.delivery_id, &reason).await,
                            "skipped",
                        );
                    } else {
                        self.ack(self.outbox.mark_delivered(event.delivery_id).await, "delivered");
                        delivered += 1;
                    }
                }
                self.with_state(|s| s.processed_count += delivered);
            }

            Err(HandlerError::Other(err)) => {
                if let Err(rollback_err) = scope.rollback().await {
                    error!(
                        worker = %self.config.name,
                        error = %format!("{rollback_err:#}"),
                        "rollback failed"
                    );
                }
                error!(
                    worker = %self.config.name,
                    error = %format!("{err:#}"),
                    "batch failed"
                );
                self.fail_batch(claim, &format!("{err:#}")).await;
            }
        }
    }

    /// Requeue (or terminally fail) every delivery in the batch.
    async fn fail_batch(&self, claim: &ClaimResult, error: &str) {
        for event in &claim.events {
            if let Err(mark_err) = self
                .outbox
                .mark_failed_with_retry(event.delivery_id, error, self.config.max_retries)
                .await
            {
                error!(
                    worker = %self.config.name,
                    delivery = %event.delivery_id,
                    error = %format!("{mark_err:#}"),
                    "mark_failed_with_retry failed"
                );
            }
        }
        self.with_state(|s| {
            s.failed_count += claim.events.len() as u64;
            s.last_error = Some(error.to_string());
        });
    }

    fn ack(&self, result: anyhow::Result<()>, what: &str) {
        if let Err(err) = result {
            // The delivery stays claimed; the janitor will return it to
            // pending after claim_timeout.
            error!(
                worker = %self.config.name,
                error = %format!("{err:#}"),
                "failed to mark delivery {what}"
            );
        }
    }

    /// Main loop: poll until shutdown; sleep `poll_interval` when idle.
    /// The in-flight batch always completes before the loop exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.config.name, event_type = %self.config.event_type, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let had_work = self.poll_once().await;
            if !had_work {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        self.with_state(|s| s.status = WorkerStatus::Stopping);
        info!(worker = %self.config.name, "worker stopped");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.config.name)
            .field("event_type", &self.config.event_type)
            .finish()
    }
}
