//! Minimal [`HandlerRuntime`] for DB-free worker tests.
//!
//! The in-memory repositories are not transactional, so scopes are no-ops;
//! the retry/skip/ack protocol under test runs entirely through the
//! outbox's delivery marks.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use osa_domain::identity::{AuthPolicy, Identity};
use osa_events::handler::EventHandler;
use osa_events::worker_config::WorkerConfig;
use osa_worker::{HandlerRuntime, HandlerScope};

pub struct MemoryRuntime {
    config: WorkerConfig,
    auth: AuthPolicy,
    handler: Arc<dyn EventHandler>,
}

impl MemoryRuntime {
    pub fn new(config: WorkerConfig, handler: Arc<dyn EventHandler>) -> Arc<Self> {
        Arc::new(MemoryRuntime {
            config,
            auth: AuthPolicy::Custom(Identity::is_system),
            handler,
        })
    }
}

#[async_trait]
impl HandlerRuntime for MemoryRuntime {
    fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn auth(&self) -> &AuthPolicy {
        &self.auth
    }

    async fn begin(&self, _identity: Identity) -> Result<Box<dyn HandlerScope>> {
        Ok(Box::new(MemoryScope {
            handler: self.handler.clone(),
        }))
    }
}

struct MemoryScope {
    handler: Arc<dyn EventHandler>,
}

#[async_trait]
impl HandlerScope for MemoryScope {
    fn handler(&self) -> &dyn EventHandler {
        self.handler.as_ref()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
