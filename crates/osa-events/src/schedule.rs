//! Scheduled-task contract for the pool's cron scheduler.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A cron-triggered task. Implementations typically look up the last
/// completion event for their subject and emit a fresh request event into
/// the outbox; they do not do the work themselves.
#[async_trait]
pub trait Schedule: Send + Sync {
    /// Run one firing. `params` comes verbatim from the schedule
    /// registration (e.g. `{"convention": "...", "limit": 100}`).
    async fn run(&self, params: &Value) -> Result<()>;
}
