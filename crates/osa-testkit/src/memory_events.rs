//! In-memory [`EventRepository`] with the complete delivery-protocol
//! semantics. One mutex guards the whole store, which makes every claim
//! atomic — concurrent claims observe disjoint pending sets exactly like
//! `FOR UPDATE SKIP LOCKED` claims do.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use osa_events::delivery::{ClaimResult, ClaimedEvent, DeliveryStatus};
use osa_events::envelope::EventEnvelope;
use osa_events::outbox::{ChangefeedQuery, EventRepository};

/// One delivery row, mirrored from the relational schema.
#[derive(Debug, Clone)]
pub struct MemDelivery {
    pub id: Uuid,
    pub event_id: Uuid,
    pub consumer_group: String,
    pub status: DeliveryStatus,
    pub routing_key: Option<String>,
    pub retry_count: u32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub delivery_error: Option<String>,
}

#[derive(Default)]
struct Store {
    events: Vec<EventEnvelope>,
    deliveries: Vec<MemDelivery>,
}

impl Store {
    fn event(&self, event_id: Uuid) -> Option<&EventEnvelope> {
        self.events.iter().find(|e| e.event_id == event_id)
    }
}

#[derive(Default)]
pub struct MemoryEventRepository {
    store: Mutex<Store>,
}

/// Backoff window in seconds for a given retry count: `min(30, 5^n)`,
/// with first attempts exempt.
fn backoff_secs(retry_count: u32) -> i64 {
    if retry_count == 0 {
        0
    } else {
        5i64.saturating_pow(retry_count).min(30)
    }
}

impl MemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // -- test inspection helpers -------------------------------------------

    pub async fn all_deliveries(&self) -> Vec<MemDelivery> {
        self.store.lock().await.deliveries.clone()
    }

    pub async fn deliveries_for_event(&self, event_id: Uuid) -> Vec<MemDelivery> {
        self.store
            .lock()
            .await
            .deliveries
            .iter()
            .filter(|d| d.event_id == event_id)
            .cloned()
            .collect()
    }

    pub async fn delivery(&self, delivery_id: Uuid) -> Option<MemDelivery> {
        self.store
            .lock()
            .await
            .deliveries
            .iter()
            .find(|d| d.id == delivery_id)
            .cloned()
    }

    pub async fn event_count(&self) -> usize {
        self.store.lock().await.events.len()
    }

    /// Simulate elapsed time: push a delivery's `updated_at` into the past
    /// so its backoff window has passed.
    pub async fn rewind_updated_at(&self, delivery_id: Uuid, secs: i64) {
        let mut store = self.store.lock().await;
        if let Some(delivery) = store.deliveries.iter_mut().find(|d| d.id == delivery_id) {
            delivery.updated_at -= chrono::Duration::seconds(secs);
        }
    }

    /// Simulate a wedged worker: push `claimed_at` into the past.
    pub async fn rewind_claimed_at(&self, delivery_id: Uuid, secs: i64) {
        let mut store = self.store.lock().await;
        if let Some(delivery) = store.deliveries.iter_mut().find(|d| d.id == delivery_id) {
            if let Some(claimed_at) = delivery.claimed_at.as_mut() {
                *claimed_at -= chrono::Duration::seconds(secs);
            }
        }
    }
}

#[async_trait]
impl EventRepository for MemoryEventRepository {
    async fn save_with_deliveries(
        &self,
        envelope: &EventEnvelope,
        consumer_groups: &[String],
        routing_key: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut store = self.store.lock().await;
        store.events.push(envelope.clone());
        for group in consumer_groups {
            store.deliveries.push(MemDelivery {
                id: Uuid::new_v4(),
                event_id: envelope.event_id,
                consumer_group: group.clone(),
                status: DeliveryStatus::Pending,
                routing_key: routing_key.map(str::to_string),
                retry_count: 0,
                claimed_at: None,
                delivered_at: None,
                updated_at: now,
                delivery_error: None,
            });
        }
        Ok(())
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<EventEnvelope>> {
        Ok(self.store.lock().await.event(event_id).cloned())
    }

    async fn find_latest_by_type(&self, event_type: &str) -> Result<Option<EventEnvelope>> {
        let store = self.store.lock().await;
        Ok(store
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn find_latest_by_type_and_field(
        &self,
        event_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<EventEnvelope>> {
        let store = self.store.lock().await;
        Ok(store
            .events
            .iter()
            .filter(|e| {
                e.event_type == event_type
                    && e.payload.get(field).and_then(|v| v.as_str()) == Some(value)
            })
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn list_events(&self, query: &ChangefeedQuery) -> Result<Vec<EventEnvelope>> {
        let store = self.store.lock().await;
        let cursor = query
            .after
            .and_then(|after| store.event(after).map(|e| e.created_at));

        let mut events: Vec<EventEnvelope> = store
            .events
            .iter()
            .filter(|e| match (cursor, query.newest_first) {
                (Some(cursor), true) => e.created_at < cursor,
                (Some(cursor), false) => e.created_at > cursor,
                (None, _) => true,
            })
            .filter(|e| {
                query
                    .event_types
                    .as_ref()
                    .map(|types| types.contains(&e.event_type))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        events.sort_by_key(|e| e.created_at);
        if query.newest_first {
            events.reverse();
        }
        events.truncate(query.limit.max(0) as usize);
        Ok(events)
    }

    async fn count_events(&self, event_types: Option<&[String]>) -> Result<i64> {
        let store = self.store.lock().await;
        let count = store
            .events
            .iter()
            .filter(|e| {
                event_types
                    .map(|types| types.contains(&e.event_type))
                    .unwrap_or(true)
            })
            .count();
        Ok(count as i64)
    }

    async fn claim_deliveries(
        &self,
        consumer_group: &str,
        event_types: &[String],
        limit: i64,
    ) -> Result<ClaimResult> {
        let now = Utc::now();
        let mut store = self.store.lock().await;

        // Eligible pending rows, oldest event first.
        let mut eligible: Vec<(usize, DateTime<Utc>)> = Vec::new();
        for (idx, delivery) in store.deliveries.iter().enumerate() {
            if delivery.consumer_group != consumer_group
                || delivery.status != DeliveryStatus::Pending
            {
                continue;
            }
            let Some(event) = store.event(delivery.event_id) else {
                continue;
            };
            if !event_types.contains(&event.event_type) {
                continue;
            }
            let window = chrono::Duration::seconds(backoff_secs(delivery.retry_count));
            if delivery.retry_count > 0 && delivery.updated_at > now - window {
                continue;
            }
            eligible.push((idx, event.created_at));
        }
        eligible.sort_by_key(|(_, created_at)| *created_at);
        eligible.truncate(limit.max(0) as usize);

        let mut events = Vec::with_capacity(eligible.len());
        for (idx, _) in eligible {
            let envelope = store
                .event(store.deliveries[idx].event_id)
                .cloned()
                .ok_or_else(|| anyhow!("delivery references missing event"))?;
            let delivery = &mut store.deliveries[idx];
            delivery.status = DeliveryStatus::Claimed;
            delivery.claimed_at = Some(now);
            delivery.updated_at = now;
            events.push(ClaimedEvent {
                delivery_id: delivery.id,
                envelope,
            });
        }
        Ok(ClaimResult {
            events,
            claimed_at: now,
        })
    }

    async fn mark_delivery(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()> {
        anyhow::ensure!(status.is_ack(), "mark_delivery requires an ack status");
        let now = Utc::now();
        let mut store = self.store.lock().await;
        let delivery = store
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery_id)
            .ok_or_else(|| anyhow!("unknown delivery: {delivery_id}"))?;
        delivery.status = status;
        delivery.delivered_at = Some(now);
        if let Some(error) = error {
            delivery.delivery_error = Some(error.to_string());
        }
        delivery.updated_at = now;
        Ok(())
    }

    async fn mark_failed_with_retry(
        &self,
        delivery_id: Uuid,
        error: &str,
        max_retries: u32,
    ) -> Result<()> {
        let now = Utc::now();
        let mut store = self.store.lock().await;
        let delivery = store
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery_id)
            .ok_or_else(|| anyhow!("unknown delivery: {delivery_id}"))?;

        let next_retry = delivery.retry_count + 1;
        if next_retry >= max_retries {
            delivery.status = DeliveryStatus::Failed;
            delivery.retry_count = next_retry.min(max_retries);
            delivery.delivered_at = Some(now);
        } else {
            delivery.status = DeliveryStatus::Pending;
            delivery.retry_count = next_retry;
            delivery.claimed_at = None;
        }
        delivery.delivery_error = Some(error.to_string());
        delivery.updated_at = now;
        Ok(())
    }

    async fn reset_stale_deliveries(&self, timeout: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(timeout)?;
        let mut reset = 0u64;
        let mut store = self.store.lock().await;
        for delivery in store.deliveries.iter_mut() {
            if delivery.status == DeliveryStatus::Claimed
                && delivery.claimed_at.map(|t| t < cutoff).unwrap_or(false)
            {
                delivery.status = DeliveryStatus::Pending;
                delivery.claimed_at = None;
                delivery.updated_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff_secs(0), 0);
        assert_eq!(backoff_secs(1), 5);
        assert_eq!(backoff_secs(2), 25);
        assert_eq!(backoff_secs(3), 30);
        assert_eq!(backoff_secs(10), 30);
    }
}
