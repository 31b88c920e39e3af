//! Scenario: outbox delivery invariants.
//!
//! # Invariants under test
//! - An event persisted with N subscribers has exactly N delivery rows and
//!   is reachable in the changefeed.
//! - An event with no subscribers is persisted audit-only (zero deliveries).
//! - Once delivered, a delivery is never reclaimed by the same group.
//! - Claim order is the events' `created_at` ascending.
//! - A delivery inside its retry-backoff window is not claimable.

use std::sync::Arc;

use osa_events::delivery::DeliveryStatus;
use osa_events::outbox::{ChangefeedQuery, Outbox};
use osa_events::subscription::SubscriptionRegistry;
use osa_events::DomainEvent;
use osa_testkit::fixtures::DummyEvent;
use osa_testkit::MemoryEventRepository;

fn outbox_with_groups(groups: &[&str]) -> (Arc<MemoryEventRepository>, Outbox) {
    let repo = Arc::new(MemoryEventRepository::new());
    let mut subscriptions = SubscriptionRegistry::new();
    for group in groups {
        subscriptions.subscribe(DummyEvent::EVENT_TYPE, group, None);
    }
    let outbox = Outbox::new(repo.clone(), Arc::new(subscriptions));
    (repo, outbox)
}

fn event_types() -> Vec<String> {
    vec![DummyEvent::EVENT_TYPE.to_string()]
}

#[tokio::test]
async fn one_delivery_row_per_subscriber_and_changefeed_visibility() -> anyhow::Result<()> {
    let (repo, outbox) = outbox_with_groups(&["GroupA", "GroupB"]);

    let event = DummyEvent::new(1);
    outbox.append(&event).await?;

    let deliveries = repo.deliveries_for_event(event.id).await;
    assert_eq!(deliveries.len(), 2, "one delivery per consumer group");
    let mut groups: Vec<_> = deliveries.iter().map(|d| d.consumer_group.clone()).collect();
    groups.sort();
    assert_eq!(groups, vec!["GroupA", "GroupB"]);
    assert!(deliveries.iter().all(|d| d.status == DeliveryStatus::Pending));
    assert!(deliveries.iter().all(|d| d.retry_count == 0));

    let feed = outbox
        .list_events(&ChangefeedQuery {
            limit: 10,
            ..ChangefeedQuery::default()
        })
        .await?;
    assert!(feed.iter().any(|e| e.event_id == event.id), "event must be in changefeed");
    Ok(())
}

#[tokio::test]
async fn subscriberless_event_is_audit_only() -> anyhow::Result<()> {
    let (repo, outbox) = outbox_with_groups(&[]);

    let event = DummyEvent::new(7);
    outbox.append(&event).await?;

    assert_eq!(repo.event_count().await, 1, "event row must exist");
    assert!(
        repo.deliveries_for_event(event.id).await.is_empty(),
        "no delivery rows without subscribers"
    );
    Ok(())
}

#[tokio::test]
async fn delivered_events_are_never_reclaimed() -> anyhow::Result<()> {
    let (_repo, outbox) = outbox_with_groups(&["GroupA"]);

    let event = DummyEvent::new(3);
    outbox.append(&event).await?;

    let claim = outbox.claim(&event_types(), 10, "GroupA").await?;
    assert_eq!(claim.events.len(), 1);
    assert_eq!(claim.events[0].event_id(), event.id);

    outbox.mark_delivered(claim.events[0].delivery_id).await?;

    let again = outbox.claim(&event_types(), 10, "GroupA").await?;
    assert!(again.is_empty(), "delivered delivery must not be reclaimable");
    Ok(())
}

#[tokio::test]
async fn claim_order_follows_event_creation() -> anyhow::Result<()> {
    let (_repo, outbox) = outbox_with_groups(&["GroupA"]);

    let mut ids = Vec::new();
    for n in 0..5 {
        let event = DummyEvent::new(n);
        ids.push(event.id);
        outbox.append(&event).await?;
    }

    let claim = outbox.claim(&event_types(), 5, "GroupA").await?;
    let claimed: Vec<_> = claim.events.iter().map(|e| e.event_id()).collect();
    assert_eq!(claimed, ids, "claims must come back oldest-first");
    Ok(())
}

#[tokio::test]
async fn backoff_window_blocks_reclaim_until_elapsed() -> anyhow::Result<()> {
    let (repo, outbox) = outbox_with_groups(&["GroupA"]);

    let event = DummyEvent::new(9);
    outbox.append(&event).await?;

    let claim = outbox.claim(&event_types(), 1, "GroupA").await?;
    let delivery_id = claim.events[0].delivery_id;
    outbox.mark_failed_with_retry(delivery_id, "transient", 3).await?;

    let delivery = repo.delivery(delivery_id).await.expect("delivery exists");
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.retry_count, 1);
    assert!(delivery.claimed_at.is_none(), "claim must be cleared on retry");

    // Within the 5-second window: not claimable.
    let blocked = outbox.claim(&event_types(), 1, "GroupA").await?;
    assert!(blocked.is_empty(), "backoff window must block the reclaim");

    // After the window: claimable again.
    repo.rewind_updated_at(delivery_id, 6).await;
    let allowed = outbox.claim(&event_types(), 1, "GroupA").await?;
    assert_eq!(allowed.events.len(), 1);
    Ok(())
}

#[tokio::test]
async fn retry_budget_caps_at_failed_with_exact_retry_count() -> anyhow::Result<()> {
    let (repo, outbox) = outbox_with_groups(&["GroupA"]);
    let max_retries = 3u32;

    let event = DummyEvent::new(11);
    outbox.append(&event).await?;

    let mut last_delivery_id = None;
    for _ in 0..max_retries {
        let claim = outbox.claim(&event_types(), 1, "GroupA").await?;
        assert_eq!(claim.events.len(), 1, "delivery must be claimable before the budget is spent");
        let delivery_id = claim.events[0].delivery_id;
        outbox
            .mark_failed_with_retry(delivery_id, "still broken", max_retries)
            .await?;
        repo.rewind_updated_at(delivery_id, 60).await;
        last_delivery_id = Some(delivery_id);

        let delivery = repo.delivery(delivery_id).await.expect("delivery exists");
        assert!(
            delivery.retry_count <= max_retries,
            "retry_count must never exceed the budget"
        );
    }

    let delivery = repo
        .delivery(last_delivery_id.expect("claimed at least once"))
        .await
        .expect("delivery exists");
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(
        delivery.retry_count, max_retries,
        "terminal failure must carry retry_count == max_retries"
    );

    let after = outbox.claim(&event_types(), 1, "GroupA").await?;
    assert!(after.is_empty(), "failed deliveries are terminal");
    Ok(())
}
