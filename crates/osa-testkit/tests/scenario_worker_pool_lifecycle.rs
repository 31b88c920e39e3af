//! Scenario: WorkerPool lifecycle — startup emission, background draining,
//! graceful stop, and startup validation failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use osa_events::delivery::DeliveryStatus;
use osa_events::handler::{HandlerResult, Handles, TypedHandler};
use osa_events::outbox::Outbox;
use osa_events::registry::EventTypeRegistry;
use osa_events::subscription::SubscriptionRegistry;
use osa_events::worker_config::WorkerConfig;
use osa_events::DomainEvent;
use osa_testkit::fixtures::DummyEvent;
use osa_testkit::{MemoryEventRepository, MemoryRuntime};
use osa_worker::{StartupError, WorkerPool};

struct CountingHandler {
    handled: Arc<AtomicUsize>,
}

#[async_trait]
impl Handles<DummyEvent> for CountingHandler {
    async fn handle(&self, _event: DummyEvent) -> HandlerResult {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn registry() -> EventTypeRegistry {
    let mut registry = EventTypeRegistry::new();
    osa_events::register_all(&mut registry).expect("register core events");
    registry.register::<DummyEvent>().expect("register DummyEvent");
    registry
}

fn fast_config(name: &str) -> WorkerConfig {
    let mut config = WorkerConfig::single(name, DummyEvent::EVENT_TYPE);
    config.poll_interval = Duration::from_millis(20);
    config
}

#[tokio::test]
async fn pool_drains_backlog_and_stops_cleanly() -> anyhow::Result<()> {
    let repo = Arc::new(MemoryEventRepository::new());
    let mut subscriptions = SubscriptionRegistry::new();
    subscriptions.subscribe(DummyEvent::EVENT_TYPE, "CountingHandler", None);
    let outbox = Arc::new(Outbox::new(repo.clone(), Arc::new(subscriptions)));

    let handled = Arc::new(AtomicUsize::new(0));
    let runtime = MemoryRuntime::new(
        fast_config("CountingHandler"),
        Arc::new(TypedHandler::new(
            CountingHandler {
                handled: handled.clone(),
            },
            false,
        )),
    );

    // Backlog before the pool starts.
    let mut event_ids = Vec::new();
    for n in 0..3 {
        let event = DummyEvent::new(n);
        event_ids.push(event.id);
        outbox.append(&event).await?;
    }

    let mut pool = WorkerPool::new(
        outbox.clone(),
        vec![runtime],
        &registry(),
        vec![],
        Duration::from_secs(60),
    )?;
    pool.start().await?;

    // The pool polls in the background; give it a moment to drain.
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(handled.load(Ordering::SeqCst), 3, "backlog must be drained");
    for event_id in &event_ids {
        let delivery = repo.deliveries_for_event(*event_id).await.remove(0);
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
    }

    // Startup emitted exactly one ServerStarted marker (audit-only here —
    // nothing subscribes to it).
    let started = outbox
        .count_events(Some(&["ServerStarted".to_string()]))
        .await?;
    assert_eq!(started, 1);

    let states = pool.worker_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].1.processed_count, 3);

    pool.stop(Duration::from_secs(5)).await;
    Ok(())
}

#[tokio::test]
async fn duplicate_consumer_groups_fail_pool_construction() {
    let repo = Arc::new(MemoryEventRepository::new());
    let outbox = Arc::new(Outbox::new(repo, Arc::new(SubscriptionRegistry::new())));

    let noop = |name: &str| {
        MemoryRuntime::new(
            fast_config(name),
            Arc::new(TypedHandler::new(
                CountingHandler {
                    handled: Arc::new(AtomicUsize::new(0)),
                },
                false,
            )),
        )
    };

    let result = WorkerPool::new(
        outbox,
        vec![noop("SameName"), noop("SameName")],
        &registry(),
        vec![],
        Duration::from_secs(60),
    );
    match result {
        Err(StartupError::DuplicateConsumerGroup(name)) => assert_eq!(name, "SameName"),
        other => panic!("expected DuplicateConsumerGroup, got {other:?}"),
    }
}

#[tokio::test]
async fn unregistered_event_type_fails_pool_construction() {
    let repo = Arc::new(MemoryEventRepository::new());
    let outbox = Arc::new(Outbox::new(repo, Arc::new(SubscriptionRegistry::new())));

    let runtime = MemoryRuntime::new(
        WorkerConfig::single("Orphan", "NoSuchEvent"),
        Arc::new(TypedHandler::new(
            CountingHandler {
                handled: Arc::new(AtomicUsize::new(0)),
            },
            false,
        )),
    );

    let result = WorkerPool::new(
        outbox,
        vec![runtime],
        &registry(),
        vec![],
        Duration::from_secs(60),
    );
    match result {
        Err(StartupError::UnknownEventType { worker, event_type }) => {
            assert_eq!(worker, "Orphan");
            assert_eq!(event_type, "NoSuchEvent");
        }
        other => panic!("expected UnknownEventType, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_worker_config_fails_pool_construction() {
    let repo = Arc::new(MemoryEventRepository::new());
    let outbox = Arc::new(Outbox::new(repo, Arc::new(SubscriptionRegistry::new())));

    let mut config = fast_config("BadTimeout");
    config.claim_timeout = config.batch_timeout; // must be strictly greater
    let runtime = MemoryRuntime::new(
        config,
        Arc::new(TypedHandler::new(
            CountingHandler {
                handled: Arc::new(AtomicUsize::new(0)),
            },
            false,
        )),
    );

    let result = WorkerPool::new(
        outbox,
        vec![runtime],
        &registry(),
        vec![],
        Duration::from_secs(60),
    );
    assert!(matches!(result, Err(StartupError::Config(_))));
}
