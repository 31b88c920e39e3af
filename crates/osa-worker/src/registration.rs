//! Handler registration: the explicit list the pool is wired from.
//!
//! A registration bundles the handler's [`WorkerConfig`], its authorization
//! gate and a factory that builds the handler inside a fresh unit-of-work
//! scope. Registrations are validated once at pool construction; anything
//! wrong there is a startup error, never a runtime one.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use osa_domain::identity::{AuthPolicy, Identity};
use osa_events::handler::EventHandler;
use osa_events::registry::EventTypeRegistry;
use osa_events::subscription::SubscriptionRegistry;
use osa_events::worker_config::{ConfigError, WorkerConfig};

/// One registered handler: configuration plus the per-cycle scope factory.
///
/// Implementations close over whatever the handler needs (connection pool,
/// index registry, storage); `begin` opens a fresh transaction and builds
/// the handler with repositories bound to it.
#[async_trait]
pub trait HandlerRuntime: Send + Sync {
    fn config(&self) -> &WorkerConfig;

    /// Authorization gate. Workers run under [`Identity::System`], which
    /// satisfies any policy; the gate exists so the same handler can be
    /// invoked from authenticated surfaces.
    fn auth(&self) -> &AuthPolicy;

    async fn begin(&self, identity: Identity) -> Result<Box<dyn HandlerScope>>;
}

/// A live unit-of-work scope holding the handler instance. Exactly one of
/// `commit` / `rollback` is called, after the handler finished.
#[async_trait]
pub trait HandlerScope: Send + Sync {
    fn handler(&self) -> &dyn EventHandler;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A wiring mistake caught at pool construction.
#[derive(Debug)]
pub enum StartupError {
    Config(ConfigError),
    DuplicateConsumerGroup(String),
    UnknownEventType { worker: String, event_type: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Config(err) => write!(f, "{err}"),
            StartupError::DuplicateConsumerGroup(name) => {
                write!(f, "consumer group registered twice: '{name}'")
            }
            StartupError::UnknownEventType { worker, event_type } => {
                write!(
                    f,
                    "worker '{worker}' subscribes to unregistered event type '{event_type}'"
                )
            }
        }
    }
}

impl std::error::Error for StartupError {}

impl From<ConfigError> for StartupError {
    fn from(err: ConfigError) -> Self {
        StartupError::Config(err)
    }
}

/// Check every registration before the pool starts.
///
/// # Errors
/// The first invalid config, duplicate consumer group, or subscription to
/// an event type missing from the registry.
pub fn validate_registrations(
    registrations: &[Arc<dyn HandlerRuntime>],
    registry: &EventTypeRegistry,
) -> Result<(), StartupError> {
    let mut names = BTreeSet::new();
    for registration in registrations {
        let config = registration.config();
        config.validate()?;
        if !names.insert(config.name.clone()) {
            return Err(StartupError::DuplicateConsumerGroup(config.name.clone()));
        }
        if !registry.contains(&config.event_type) {
            return Err(StartupError::UnknownEventType {
                worker: config.name.clone(),
                event_type: config.event_type.clone(),
            });
        }
    }
    Ok(())
}

/// Build the frozen subscription registry from the handler list.
pub fn build_subscriptions(registrations: &[Arc<dyn HandlerRuntime>]) -> SubscriptionRegistry {
    let mut subscriptions = SubscriptionRegistry::new();
    for registration in registrations {
        let config = registration.config();
        subscriptions.subscribe(
            &config.event_type,
            &config.name,
            config.routing_key.as_deref(),
        );
    }
    subscriptions
}
