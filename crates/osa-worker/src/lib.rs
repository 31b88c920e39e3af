//! Pull-based worker runtime.
//!
//! One [`Worker`] exists per registered handler. Workers claim deliveries
//! from the outbox under `FOR UPDATE SKIP LOCKED`, run the handler inside a
//! fresh unit-of-work scope, and acknowledge each delivery. They coordinate
//! only through the database, so additional pool processes scale out with
//! no extra mechanism.
//!
//! The [`WorkerPool`] owns the workers plus a stale-claim janitor and a
//! cron scheduler, and ties their lifecycle to the server process.

pub mod pool;
pub mod registration;
pub mod scheduler;
pub mod worker;

pub use pool::WorkerPool;
pub use registration::{
    build_subscriptions, validate_registrations, HandlerRuntime, HandlerScope, StartupError,
};
pub use scheduler::ScheduleRegistration;
pub use worker::Worker;
