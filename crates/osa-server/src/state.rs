//! Shared runtime state for the HTTP surface.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Worker state handles
//! are collected before the pool starts so the status endpoint reads live
//! counters without owning the pool.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use sqlx::PgPool;

use osa_events::outbox::Outbox;
use osa_events::worker_config::WorkerState;
use osa_index::IndexRegistry;

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub struct AppState {
    pub build: BuildInfo,
    pub started_at: Instant,
    pub config_hash: String,
    /// Pool-level outbox: changefeed reads.
    pub outbox: Arc<Outbox>,
    /// Live worker state handles, one per consumer group.
    pub worker_states: Vec<(String, Arc<Mutex<WorkerState>>)>,
    /// Registered search backends, for the search and stats surfaces.
    pub indexes: IndexRegistry,
    /// Aggregate-count source; absent in router-only tests.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        config_hash: String,
        outbox: Arc<Outbox>,
        worker_states: Vec<(String, Arc<Mutex<WorkerState>>)>,
        indexes: IndexRegistry,
        pool: Option<PgPool>,
    ) -> Self {
        AppState {
            build: BuildInfo {
                service: "osa-server",
                version: env!("CARGO_PKG_VERSION"),
            },
            started_at: Instant::now(),
            config_hash,
            outbox,
            worker_states,
            indexes,
            pool,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn worker_snapshots(&self) -> Vec<(String, WorkerState)> {
        self.worker_states
            .iter()
            .map(|(name, state)| {
                let snapshot = state.lock().expect("worker state poisoned").clone();
                (name.clone(), snapshot)
            })
            .collect()
    }
}
