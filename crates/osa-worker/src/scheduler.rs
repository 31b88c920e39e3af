//! Cron scheduler: fires [`Schedule`] tasks at their cron times.
//!
//! Each schedule runs in its own task. Failures are counted per schedule;
//! five consecutive failures escalate the log severity so operators notice
//! a permanently broken schedule without it ever crashing the pool.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info};

use osa_events::schedule::Schedule;

/// Escalate after this many consecutive failures.
const FAILURE_ESCALATION_THRESHOLD: u32 = 5;

/// One cron-triggered task registration.
pub struct ScheduleRegistration {
    pub id: String,
    pub cron: cron::Schedule,
    /// Original expression, kept for logging.
    pub cron_expr: String,
    pub schedule: Arc<dyn Schedule>,
    pub params: Value,
}

impl ScheduleRegistration {
    /// # Errors
    /// Fails when `cron_expr` does not parse.
    pub fn new(
        id: &str,
        cron_expr: &str,
        schedule: Arc<dyn Schedule>,
        params: Value,
    ) -> Result<Self> {
        let cron = cron::Schedule::from_str(cron_expr)
            .with_context(|| format!("invalid cron expression for schedule '{id}': {cron_expr:?}"))?;
        Ok(ScheduleRegistration {
            id: id.to_string(),
            cron,
            cron_expr: cron_expr.to_string(),
            schedule,
            params,
        })
    }
}

impl std::fmt::Debug for ScheduleRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleRegistration")
            .field("id", &self.id)
            .field("cron", &self.cron_expr)
            .finish()
    }
}

/// Fire a schedule at each cron time until shutdown.
pub(crate) async fn run_schedule_loop(
    registration: ScheduleRegistration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(schedule = %registration.id, cron = %registration.cron_expr, "schedule registered");
    let mut consecutive_failures: u32 = 0;

    loop {
        let next = match registration.cron.upcoming(Utc).next() {
            Some(next) => next,
            None => {
                info!(schedule = %registration.id, "schedule has no future firings; exiting");
                return;
            }
        };
        let delay = (next - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            info!(schedule = %registration.id, "schedule stopped");
            return;
        }

        match registration.schedule.run(&registration.params).await {
            Ok(()) => {
                consecutive_failures = 0;
                debug!(schedule = %registration.id, "schedule ran");
            }
            Err(err) => {
                consecutive_failures += 1;
                error!(
                    schedule = %registration.id,
                    failures = consecutive_failures,
                    error = %format!("{err:#}"),
                    "schedule run failed"
                );
                if consecutive_failures >= FAILURE_ESCALATION_THRESHOLD {
                    error!(
                        schedule = %registration.id,
                        failures = consecutive_failures,
                        "CRITICAL: schedule keeps failing; operator attention required"
                    );
                }
            }
        }
    }
}
