//! The transactional outbox: the only write/claim API handlers touch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::delivery::{ClaimResult, DeliveryStatus};
use crate::envelope::{DomainEvent, EventEnvelope};
use crate::subscription::SubscriptionRegistry;

/// Changefeed pagination parameters for [`EventRepository::list_events`].
#[derive(Debug, Clone, Default)]
pub struct ChangefeedQuery {
    pub limit: i64,
    /// Cursor: only events strictly after (or before, for `newest_first`)
    /// this event id's position.
    pub after: Option<Uuid>,
    /// Restrict to these event type names.
    pub event_types: Option<Vec<String>>,
    /// Newest first (operator views); oldest first for federation polls.
    pub newest_first: bool,
}

/// Persistence port for events and deliveries.
///
/// The events table is append-only; the deliveries table carries the mutable
/// per-consumer state. Implementations MUST make `claim_deliveries`
/// atomic — two concurrent claims for the same group must return disjoint
/// delivery sets.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert the event plus one `pending` delivery row per consumer group,
    /// in one transaction. With no groups, the event alone is persisted
    /// (audit-only).
    async fn save_with_deliveries(
        &self,
        envelope: &EventEnvelope,
        consumer_groups: &[String],
        routing_key: Option<&str>,
    ) -> Result<()>;

    async fn get(&self, event_id: Uuid) -> Result<Option<EventEnvelope>>;

    async fn find_latest_by_type(&self, event_type: &str) -> Result<Option<EventEnvelope>>;

    /// Most recent event of a type where `payload->>field = value`.
    async fn find_latest_by_type_and_field(
        &self,
        event_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<EventEnvelope>>;

    async fn list_events(&self, query: &ChangefeedQuery) -> Result<Vec<EventEnvelope>>;

    async fn count_events(&self, event_types: Option<&[String]>) -> Result<i64>;

    /// Claim up to `limit` pending deliveries for `consumer_group` whose
    /// event type is in `event_types` and whose retry-backoff window has
    /// elapsed, oldest events first. Claimed rows transition to `claimed`.
    async fn claim_deliveries(
        &self,
        consumer_group: &str,
        event_types: &[String],
        limit: i64,
    ) -> Result<ClaimResult>;

    /// Acknowledge one delivery. `status` MUST be an ack state
    /// (`delivered`, `failed`, `skipped`).
    async fn mark_delivery(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Retry-aware failure: below the retry budget the delivery returns to
    /// `pending` with `retry_count + 1`; at the budget it becomes `failed`.
    async fn mark_failed_with_retry(
        &self,
        delivery_id: Uuid,
        error: &str,
        max_retries: u32,
    ) -> Result<()>;

    /// Reset deliveries stuck in `claimed` longer than `timeout` back to
    /// `pending`. Returns the number reset.
    async fn reset_stale_deliveries(&self, timeout: Duration) -> Result<u64>;
}

/// Domain service for reliable event delivery.
///
/// Wraps the repository with subscription resolution: appending an event
/// fans it out to every consumer group subscribed to its type (and routing
/// key). Create one per unit of work so appends share the caller's
/// transaction; workers additionally hold a pool-level outbox for the
/// claim/ack path, where every call is its own short transaction.
pub struct Outbox {
    repo: Arc<dyn EventRepository>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl Outbox {
    pub fn new(repo: Arc<dyn EventRepository>, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Outbox { repo, subscriptions }
    }

    /// Append an event for delivery to all subscribers of its type.
    pub async fn append<E: DomainEvent>(&self, event: &E) -> Result<()> {
        self.append_routed(event, None).await
    }

    /// Append with a routing key, sub-partitioning subscribers that share
    /// the event type (e.g. per-backend index handlers).
    pub async fn append_routed<E: DomainEvent>(
        &self,
        event: &E,
        routing_key: Option<&str>,
    ) -> Result<()> {
        let envelope = EventEnvelope::encode(event)?;
        let groups = self.subscriptions.subscribers_for(E::EVENT_TYPE, routing_key);
        if groups.is_empty() {
            tracing::debug!(event_type = E::EVENT_TYPE, "no subscribers; persisting audit-only");
        }
        self.repo
            .save_with_deliveries(&envelope, &groups, routing_key)
            .await
    }

    pub async fn claim(
        &self,
        event_types: &[String],
        limit: i64,
        consumer_group: &str,
    ) -> Result<ClaimResult> {
        self.repo.claim_deliveries(consumer_group, event_types, limit).await
    }

    pub async fn mark_delivered(&self, delivery_id: Uuid) -> Result<()> {
        self.repo
            .mark_delivery(delivery_id, DeliveryStatus::Delivered, None)
            .await
    }

    pub async fn mark_failed(&self, delivery_id: Uuid, error: &str) -> Result<()> {
        self.repo
            .mark_delivery(delivery_id, DeliveryStatus::Failed, Some(error))
            .await
    }

    pub async fn mark_skipped(&self, delivery_id: Uuid, reason: &str) -> Result<()> {
        self.repo
            .mark_delivery(delivery_id, DeliveryStatus::Skipped, Some(reason))
            .await
    }

    pub async fn mark_failed_with_retry(
        &self,
        delivery_id: Uuid,
        error: &str,
        max_retries: u32,
    ) -> Result<()> {
        self.repo.mark_failed_with_retry(delivery_id, error, max_retries).await
    }

    /// Most recent event of a type, decoded; `None` when none exists.
    pub async fn find_latest<E: DomainEvent>(&self) -> Result<Option<E>> {
        match self.repo.find_latest_by_type(E::EVENT_TYPE).await? {
            Some(envelope) => Ok(Some(envelope.decode()?)),
            None => Ok(None),
        }
    }

    /// Most recent event of a type with `payload->>field = value`, decoded.
    pub async fn find_latest_where<E: DomainEvent>(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<E>> {
        match self
            .repo
            .find_latest_by_type_and_field(E::EVENT_TYPE, field, value)
            .await?
        {
            Some(envelope) => Ok(Some(envelope.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn reset_stale_claims(&self, timeout: Duration) -> Result<u64> {
        self.repo.reset_stale_deliveries(timeout).await
    }

    /// Changefeed access for the audit/federation surface.
    pub async fn list_events(&self, query: &ChangefeedQuery) -> Result<Vec<EventEnvelope>> {
        self.repo.list_events(query).await
    }

    pub async fn count_events(&self, event_types: Option<&[String]>) -> Result<i64> {
        self.repo.count_events(event_types).await
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ClaimResult;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        id: Uuid,
    }

    impl DomainEvent for Ping {
        const EVENT_TYPE: &'static str = "Ping";

        fn event_id(&self) -> Uuid {
            self.id
        }
    }

    /// Records `save_with_deliveries` calls; every other operation is
    /// unreachable in these tests.
    #[derive(Default)]
    struct RecordingRepo {
        saves: Mutex<Vec<(String, Vec<String>, Option<String>)>>,
    }

    #[async_trait]
    impl EventRepository for RecordingRepo {
        async fn save_with_deliveries(
            &self,
            envelope: &EventEnvelope,
            consumer_groups: &[String],
            routing_key: Option<&str>,
        ) -> Result<()> {
            self.saves.lock().expect("lock").push((
                envelope.event_type.clone(),
                consumer_groups.to_vec(),
                routing_key.map(str::to_string),
            ));
            Ok(())
        }

        async fn get(&self, _event_id: Uuid) -> Result<Option<EventEnvelope>> {
            unreachable!()
        }

        async fn find_latest_by_type(&self, _event_type: &str) -> Result<Option<EventEnvelope>> {
            Ok(None)
        }

        async fn find_latest_by_type_and_field(
            &self,
            _event_type: &str,
            _field: &str,
            _value: &str,
        ) -> Result<Option<EventEnvelope>> {
            Ok(None)
        }

        async fn list_events(&self, _query: &ChangefeedQuery) -> Result<Vec<EventEnvelope>> {
            unreachable!()
        }

        async fn count_events(&self, _event_types: Option<&[String]>) -> Result<i64> {
            unreachable!()
        }

        async fn claim_deliveries(
            &self,
            _consumer_group: &str,
            _event_types: &[String],
            _limit: i64,
        ) -> Result<ClaimResult> {
            Ok(ClaimResult::empty(Utc::now()))
        }

        async fn mark_delivery(
            &self,
            _delivery_id: Uuid,
            _status: DeliveryStatus,
            _error: Option<&str>,
        ) -> Result<()> {
            unreachable!()
        }

        async fn mark_failed_with_retry(
            &self,
            _delivery_id: Uuid,
            _error: &str,
            _max_retries: u32,
        ) -> Result<()> {
            unreachable!()
        }

        async fn reset_stale_deliveries(&self, _timeout: Duration) -> Result<u64> {
            Ok(0)
        }
    }

    fn outbox(registry: SubscriptionRegistry) -> (Arc<RecordingRepo>, Outbox) {
        let repo = Arc::new(RecordingRepo::default());
        let outbox = Outbox::new(repo.clone(), Arc::new(registry));
        (repo, outbox)
    }

    #[tokio::test]
    async fn append_resolves_subscribers_for_the_event_type() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("Ping", "GroupA", None);
        registry.subscribe("Ping", "GroupB", None);
        registry.subscribe("Pong", "Elsewhere", None);
        let (repo, outbox) = outbox(registry);

        outbox.append(&Ping { id: Uuid::new_v4() }).await.unwrap();

        let saves = repo.saves.lock().expect("lock");
        assert_eq!(saves.len(), 1);
        let (event_type, groups, routing_key) = &saves[0];
        assert_eq!(event_type, "Ping");
        assert_eq!(groups, &vec!["GroupA".to_string(), "GroupB".to_string()]);
        assert!(routing_key.is_none());
    }

    #[tokio::test]
    async fn routed_append_only_reaches_matching_filters() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("Ping", "VectorSide", Some("vector"));
        registry.subscribe("Ping", "KeywordSide", Some("keyword"));
        registry.subscribe("Ping", "Unfiltered", None);
        let (repo, outbox) = outbox(registry);

        outbox
            .append_routed(&Ping { id: Uuid::new_v4() }, Some("vector"))
            .await
            .unwrap();

        let saves = repo.saves.lock().expect("lock");
        let (_, groups, routing_key) = &saves[0];
        let mut sorted = groups.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["Unfiltered".to_string(), "VectorSide".to_string()]);
        assert_eq!(routing_key.as_deref(), Some("vector"));
    }

    #[tokio::test]
    async fn append_without_subscribers_is_audit_only() {
        let (repo, outbox) = outbox(SubscriptionRegistry::new());

        outbox.append(&Ping { id: Uuid::new_v4() }).await.unwrap();

        let saves = repo.saves.lock().expect("lock");
        assert_eq!(saves.len(), 1, "the event is still persisted");
        assert!(saves[0].1.is_empty(), "with zero delivery rows");
    }
}
