//! Scenario: stale-claim recovery.
//!
//! A delivery stuck in `claimed` longer than the claim timeout (crashed or
//! wedged worker) is returned to `pending` with its claim cleared, so
//! another worker can pick it up.

use std::sync::Arc;
use std::time::Duration;

use osa_events::delivery::DeliveryStatus;
use osa_events::outbox::Outbox;
use osa_events::subscription::SubscriptionRegistry;
use osa_events::DomainEvent;
use osa_testkit::fixtures::DummyEvent;
use osa_testkit::MemoryEventRepository;

fn setup() -> (Arc<MemoryEventRepository>, Outbox) {
    let repo = Arc::new(MemoryEventRepository::new());
    let mut subscriptions = SubscriptionRegistry::new();
    subscriptions.subscribe(DummyEvent::EVENT_TYPE, "Group", None);
    let outbox = Outbox::new(repo.clone(), Arc::new(subscriptions));
    (repo, outbox)
}

#[tokio::test]
async fn stale_claim_returns_to_pending_with_claim_cleared() -> anyhow::Result<()> {
    let (repo, outbox) = setup();
    let types = vec![DummyEvent::EVENT_TYPE.to_string()];

    let event = DummyEvent::new(1);
    outbox.append(&event).await?;

    let claim = outbox.claim(&types, 1, "Group").await?;
    let delivery_id = claim.events[0].delivery_id;

    // Simulate a worker that died 600 seconds ago.
    repo.rewind_claimed_at(delivery_id, 600).await;

    let reset = outbox.reset_stale_claims(Duration::from_secs(300)).await?;
    assert!(reset >= 1, "at least the stale claim must be reset");

    let delivery = repo.delivery(delivery_id).await.expect("delivery exists");
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert!(delivery.claimed_at.is_none(), "claimed_at must be cleared");

    // The recovered delivery is immediately claimable again.
    let reclaimed = outbox.claim(&types, 1, "Group").await?;
    assert_eq!(reclaimed.events.len(), 1);
    assert_eq!(reclaimed.events[0].event_id(), event.id);
    Ok(())
}

#[tokio::test]
async fn fresh_claims_survive_the_janitor() -> anyhow::Result<()> {
    let (repo, outbox) = setup();
    let types = vec![DummyEvent::EVENT_TYPE.to_string()];

    outbox.append(&DummyEvent::new(2)).await?;
    let claim = outbox.claim(&types, 1, "Group").await?;
    let delivery_id = claim.events[0].delivery_id;

    let reset = outbox.reset_stale_claims(Duration::from_secs(300)).await?;
    assert_eq!(reset, 0, "an in-flight claim is not stale");

    let delivery = repo.delivery(delivery_id).await.expect("delivery exists");
    assert_eq!(delivery.status, DeliveryStatus::Claimed);
    Ok(())
}
