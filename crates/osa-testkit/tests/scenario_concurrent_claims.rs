//! Scenario: concurrent claims under one consumer group are disjoint.
//!
//! Two claimers racing for the same pending set must never receive the
//! same delivery, and together must receive all of it.

use std::collections::BTreeSet;
use std::sync::Arc;

use osa_events::outbox::Outbox;
use osa_events::subscription::SubscriptionRegistry;
use osa_events::DomainEvent;
use osa_testkit::fixtures::DummyEvent;
use osa_testkit::MemoryEventRepository;

#[tokio::test]
async fn two_concurrent_claims_split_the_pending_set() -> anyhow::Result<()> {
    let repo = Arc::new(MemoryEventRepository::new());
    let mut subscriptions = SubscriptionRegistry::new();
    subscriptions.subscribe(DummyEvent::EVENT_TYPE, "Group", None);
    let outbox = Arc::new(Outbox::new(repo.clone(), Arc::new(subscriptions)));

    let mut all_ids = BTreeSet::new();
    for n in 0..6 {
        let event = DummyEvent::new(n);
        all_ids.insert(event.id);
        outbox.append(&event).await?;
    }

    let types = vec![DummyEvent::EVENT_TYPE.to_string()];
    let (a, b) = tokio::join!(
        outbox.claim(&types, 3, "Group"),
        outbox.claim(&types, 3, "Group"),
    );
    let (a, b) = (a?, b?);

    assert_eq!(a.events.len(), 3, "first claimer takes half");
    assert_eq!(b.events.len(), 3, "second claimer takes the rest");

    let ids_a: BTreeSet<_> = a.events.iter().map(|e| e.event_id()).collect();
    let ids_b: BTreeSet<_> = b.events.iter().map(|e| e.event_id()).collect();
    assert!(ids_a.is_disjoint(&ids_b), "no delivery may be claimed twice");

    let union: BTreeSet<_> = ids_a.union(&ids_b).copied().collect();
    assert_eq!(union, all_ids, "together the claims cover the seeded set");
    Ok(())
}

#[tokio::test]
async fn different_groups_each_receive_every_event() -> anyhow::Result<()> {
    let repo = Arc::new(MemoryEventRepository::new());
    let mut subscriptions = SubscriptionRegistry::new();
    subscriptions.subscribe(DummyEvent::EVENT_TYPE, "GroupA", None);
    subscriptions.subscribe(DummyEvent::EVENT_TYPE, "GroupB", None);
    let outbox = Arc::new(Outbox::new(repo.clone(), Arc::new(subscriptions)));

    for n in 0..4 {
        outbox.append(&DummyEvent::new(n)).await?;
    }

    let types = vec![DummyEvent::EVENT_TYPE.to_string()];
    let a = outbox.claim(&types, 10, "GroupA").await?;
    let b = outbox.claim(&types, 10, "GroupB").await?;

    // Deliveries are per-group: one group claiming takes nothing from the
    // other.
    assert_eq!(a.events.len(), 4);
    assert_eq!(b.events.len(), 4);
    Ok(())
}
