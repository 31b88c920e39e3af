//! Event repository implementations.
//!
//! [`PgEventRepository`] runs every call as its own short transaction on the
//! pool — this is the claim/ack path workers use, so a claim committed by
//! one process is immediately visible to every other.
//!
//! [`TxEventRepository`] binds the same statements to a unit of work, which
//! is how handler appends join the business write in one transaction.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use osa_events::delivery::{ClaimResult, DeliveryStatus};
use osa_events::envelope::EventEnvelope;
use osa_events::outbox::{ChangefeedQuery, EventRepository};

use crate::event_sql;
use crate::uow::{conn, PgUnitOfWork};

// ---------------------------------------------------------------------------
// PgEventRepository (pool-backed)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        PgEventRepository { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn save_with_deliveries(
        &self,
        envelope: &EventEnvelope,
        consumer_groups: &[String],
        routing_key: Option<&str>,
    ) -> Result<()> {
        // Event + delivery rows must appear atomically.
        let mut tx = self.pool.begin().await.context("begin save_with_deliveries")?;
        event_sql::insert_event(&mut tx, envelope).await?;
        for group in consumer_groups {
            event_sql::insert_delivery(&mut tx, envelope.event_id, group, routing_key).await?;
        }
        tx.commit().await.context("commit save_with_deliveries")?;
        Ok(())
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<EventEnvelope>> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::get_event(&mut conn, event_id).await
    }

    async fn find_latest_by_type(&self, event_type: &str) -> Result<Option<EventEnvelope>> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::find_latest_by_type(&mut conn, event_type).await
    }

    async fn find_latest_by_type_and_field(
        &self,
        event_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<EventEnvelope>> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::find_latest_by_type_and_field(&mut conn, event_type, field, value).await
    }

    async fn list_events(&self, query: &ChangefeedQuery) -> Result<Vec<EventEnvelope>> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::list_events(&mut conn, query).await
    }

    async fn count_events(&self, event_types: Option<&[String]>) -> Result<i64> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::count_events(&mut conn, event_types).await
    }

    async fn claim_deliveries(
        &self,
        consumer_group: &str,
        event_types: &[String],
        limit: i64,
    ) -> Result<ClaimResult> {
        // Single CTE statement: select-for-update-skip-locked + flip to
        // 'claimed'. Statement-level atomicity is the whole protocol.
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::claim_deliveries(&mut conn, consumer_group, event_types, limit).await
    }

    async fn mark_delivery(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::mark_delivery(&mut conn, delivery_id, status, error).await
    }

    async fn mark_failed_with_retry(
        &self,
        delivery_id: Uuid,
        error: &str,
        max_retries: u32,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::mark_failed_with_retry(&mut conn, delivery_id, error, max_retries).await
    }

    async fn reset_stale_deliveries(&self, timeout: Duration) -> Result<u64> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        event_sql::reset_stale_deliveries(&mut conn, timeout.as_secs_f64()).await
    }
}

// ---------------------------------------------------------------------------
// TxEventRepository (unit-of-work-backed)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TxEventRepository {
    uow: Arc<PgUnitOfWork>,
}

impl TxEventRepository {
    pub fn new(uow: Arc<PgUnitOfWork>) -> Self {
        TxEventRepository { uow }
    }
}

#[async_trait]
impl EventRepository for TxEventRepository {
    async fn save_with_deliveries(
        &self,
        envelope: &EventEnvelope,
        consumer_groups: &[String],
        routing_key: Option<&str>,
    ) -> Result<()> {
        let mut guard = self.uow.lock_tx().await;
        let conn = conn(&mut guard)?;
        event_sql::insert_event(conn, envelope).await?;
        for group in consumer_groups {
            event_sql::insert_delivery(conn, envelope.event_id, group, routing_key).await?;
        }
        Ok(())
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<EventEnvelope>> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::get_event(conn(&mut guard)?, event_id).await
    }

    async fn find_latest_by_type(&self, event_type: &str) -> Result<Option<EventEnvelope>> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::find_latest_by_type(conn(&mut guard)?, event_type).await
    }

    async fn find_latest_by_type_and_field(
        &self,
        event_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<EventEnvelope>> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::find_latest_by_type_and_field(conn(&mut guard)?, event_type, field, value).await
    }

    async fn list_events(&self, query: &ChangefeedQuery) -> Result<Vec<EventEnvelope>> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::list_events(conn(&mut guard)?, query).await
    }

    async fn count_events(&self, event_types: Option<&[String]>) -> Result<i64> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::count_events(conn(&mut guard)?, event_types).await
    }

    async fn claim_deliveries(
        &self,
        consumer_group: &str,
        event_types: &[String],
        limit: i64,
    ) -> Result<ClaimResult> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::claim_deliveries(conn(&mut guard)?, consumer_group, event_types, limit).await
    }

    async fn mark_delivery(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::mark_delivery(conn(&mut guard)?, delivery_id, status, error).await
    }

    async fn mark_failed_with_retry(
        &self,
        delivery_id: Uuid,
        error: &str,
        max_retries: u32,
    ) -> Result<()> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::mark_failed_with_retry(conn(&mut guard)?, delivery_id, error, max_retries).await
    }

    async fn reset_stale_deliveries(&self, timeout: Duration) -> Result<u64> {
        let mut guard = self.uow.lock_tx().await;
        event_sql::reset_stale_deliveries(conn(&mut guard)?, timeout.as_secs_f64()).await
    }
}
