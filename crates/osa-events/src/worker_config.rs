//! Worker configuration and runtime state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

/// Per-handler worker tuning. Declared by the handler implementation and
/// immutable after registration.
///
/// `name` doubles as the consumer group under which deliveries are claimed,
/// so it MUST be unique across the pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Handler name == consumer group.
    pub name: String,
    /// Event type discriminator this worker claims.
    pub event_type: String,
    /// Optional routing-key filter; the subscription registry only creates
    /// deliveries for this group when the event's routing key matches.
    pub routing_key: Option<String>,
    /// Maximum deliveries claimed per poll.
    pub batch_size: usize,
    /// Upper bound on how long a partial batch is worked on.
    pub batch_timeout: Duration,
    /// Idle sleep between polls that found no work.
    pub poll_interval: Duration,
    /// Retry budget before a delivery is marked permanently failed.
    pub max_retries: u32,
    /// Claims older than this are considered stale and reset by the janitor.
    /// MUST exceed `batch_timeout` plus the worst-case handler runtime.
    pub claim_timeout: Duration,
}

impl WorkerConfig {
    /// Baseline single-event configuration for a handler.
    pub fn single(name: &str, event_type: &str) -> Self {
        WorkerConfig {
            name: name.to_string(),
            event_type: event_type.to_string(),
            routing_key: None,
            batch_size: 1,
            batch_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            max_retries: 3,
            claim_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_routing_key(mut self, key: &str) -> Self {
        self.routing_key = Some(key.to_string());
        self
    }

    pub fn with_batch(mut self, batch_size: usize, batch_timeout: Duration) -> Self {
        self.batch_size = batch_size;
        self.batch_timeout = batch_timeout;
        self
    }

    /// # Errors
    /// Returns the first violated constraint. Called at pool construction;
    /// a bad config is a startup error, never a runtime one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::new(&self.name, "name must not be empty"));
        }
        if self.event_type.is_empty() {
            return Err(ConfigError::new(&self.name, "event_type must not be empty"));
        }
        if self.batch_size < 1 {
            return Err(ConfigError::new(&self.name, "batch_size must be >= 1"));
        }
        if self.batch_timeout.is_zero() {
            return Err(ConfigError::new(&self.name, "batch_timeout must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::new(&self.name, "poll_interval must be > 0"));
        }
        if self.claim_timeout <= self.batch_timeout {
            return Err(ConfigError::new(
                &self.name,
                "claim_timeout must exceed batch_timeout",
            ));
        }
        Ok(())
    }
}

/// A worker configuration constraint violation, reported at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub worker: String,
    pub message: &'static str,
}

impl ConfigError {
    fn new(worker: &str, message: &'static str) -> Self {
        ConfigError {
            worker: worker.to_string(),
            message,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid worker config '{}': {}", self.worker, self.message)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// WorkerState
// ---------------------------------------------------------------------------

/// Where a worker is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Claiming,
    Processing,
    Stopping,
}

/// Mutable runtime state of one worker, surfaced through the status API.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerState {
    pub status: WorkerStatus,
    /// Event ids of the batch currently being processed.
    pub current_batch: Vec<Uuid>,
    pub last_claim_at: Option<DateTime<Utc>>,
    pub processed_count: u64,
    pub failed_count: u64,
    pub last_error: Option<String>,
}

impl WorkerState {
    pub fn new() -> Self {
        WorkerState {
            status: WorkerStatus::Idle,
            current_batch: Vec::new(),
            last_claim_at: None,
            processed_count: 0,
            failed_count: 0,
            last_error: None,
        }
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
