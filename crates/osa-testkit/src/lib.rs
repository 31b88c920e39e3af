//! Test doubles and fixtures for the archive's event core.
//!
//! [`MemoryEventRepository`] implements the full claim protocol in memory —
//! backoff windows, stale-claim resets, retry budgets, claim disjointness —
//! so worker and pipeline behavior can be exercised without Postgres. The
//! Postgres scenario tests in `osa-db/tests` cover the same protocol
//! against the real engine.

pub mod fixtures;
pub mod index;
pub mod memory_domain;
pub mod memory_events;
pub mod runner;
pub mod runtime;

pub use index::RecordingIndexBackend;
pub use memory_domain::{
    MemoryConventionRepository, MemoryDepositionRepository, MemoryFeatureStore,
    MemoryRecordRepository,
};
pub use memory_events::MemoryEventRepository;
pub use runner::ScriptedSourceRunner;
pub use runtime::MemoryRuntime;
