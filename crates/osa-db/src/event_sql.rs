//! SQL for the event log and delivery protocol.
//!
//! Everything here takes `&mut PgConnection` so the same statements serve
//! both the pool-backed repository (autocommit, one short transaction per
//! call) and the unit-of-work-backed repository (caller's transaction).
//!
//! # Claim protocol
//!
//! `claim_deliveries` is one CTE statement: select eligible `pending` rows
//! oldest-event-first with `FOR UPDATE SKIP LOCKED`, flip them to `claimed`,
//! and return them joined to their events. Because rows locked by a
//! concurrent claimer are skipped rather than waited on, two claims under
//! the same consumer group always return disjoint sets.
//!
//! # Retry backoff
//!
//! Eligibility includes `updated_at <= now() - min(30, 5^retry_count) s`
//! (first attempts exempt), which yields capped exponential backoff without
//! any sleeping in the worker.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::postgres::Postgres;
use sqlx::{PgConnection, QueryBuilder, Row};
use uuid::Uuid;

use osa_events::delivery::{ClaimResult, ClaimedEvent, DeliveryStatus};
use osa_events::envelope::EventEnvelope;
use osa_events::outbox::ChangefeedQuery;

pub(crate) async fn insert_event(conn: &mut PgConnection, envelope: &EventEnvelope) -> Result<()> {
    sqlx::query(
        r#"
        insert into events (id, event_type, payload, created_at)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(envelope.event_id)
    .bind(&envelope.event_type)
    .bind(&envelope.payload)
    .bind(envelope.created_at)
    .execute(conn)
    .await
    .context("insert_event failed")?;
    Ok(())
}

pub(crate) async fn insert_delivery(
    conn: &mut PgConnection,
    event_id: Uuid,
    consumer_group: &str,
    routing_key: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into deliveries (id, event_id, consumer_group, status, routing_key, retry_count)
        values ($1, $2, $3, 'pending', $4, 0)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(event_id)
    .bind(consumer_group)
    .bind(routing_key)
    .execute(conn)
    .await
    .context("insert_delivery failed")?;
    Ok(())
}

/// Atomically claim up to `limit` eligible deliveries for a consumer group.
pub(crate) async fn claim_deliveries(
    conn: &mut PgConnection,
    consumer_group: &str,
    event_types: &[String],
    limit: i64,
) -> Result<ClaimResult> {
    let claimed_at = Utc::now();

    let rows = sqlx::query(
        r#"
        with to_claim as (
            select d.id
              from deliveries d
              join events e on e.id = d.event_id
             where d.consumer_group = $1
               and d.status = 'pending'
               and e.event_type = any($2)
               and (d.retry_count = 0
                    or d.updated_at <= now()
                       - make_interval(secs => least(30.0, power(5, d.retry_count))))
             order by e.created_at asc
             limit $3
               for update of d skip locked
        ),
        claimed as (
            update deliveries d
               set status     = 'claimed',
                   claimed_at = now(),
                   updated_at = now()
              from to_claim
             where d.id = to_claim.id
         returning d.id as delivery_id, d.event_id
        )
        select c.delivery_id, e.id as event_id, e.event_type, e.payload, e.created_at
          from claimed c
          join events e on e.id = c.event_id
         order by e.created_at asc
        "#,
    )
    .bind(consumer_group)
    .bind(event_types.to_vec())
    .bind(limit)
    .fetch_all(conn)
    .await
    .context("claim_deliveries failed")?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        events.push(ClaimedEvent {
            delivery_id: row.try_get("delivery_id")?,
            envelope: EventEnvelope {
                event_id: row.try_get("event_id")?,
                event_type: row.try_get("event_type")?,
                payload: row.try_get("payload")?,
                created_at: row.try_get("created_at")?,
            },
        });
    }
    Ok(ClaimResult { events, claimed_at })
}

/// Acknowledge a delivery with a terminal status.
pub(crate) async fn mark_delivery(
    conn: &mut PgConnection,
    delivery_id: Uuid,
    status: DeliveryStatus,
    error: Option<&str>,
) -> Result<()> {
    anyhow::ensure!(
        status.is_ack(),
        "mark_delivery requires an ack status, got '{status}'"
    );
    sqlx::query(
        r#"
        update deliveries
           set status         = $2,
               delivered_at   = now(),
               delivery_error = coalesce($3, delivery_error),
               updated_at     = now()
         where id = $1
        "#,
    )
    .bind(delivery_id)
    .bind(status.as_str())
    .bind(error)
    .execute(conn)
    .await
    .context("mark_delivery failed")?;
    Ok(())
}

/// Retry-aware failure. Below the budget the row returns to `pending` with
/// `retry_count + 1` and a cleared claim; at the budget it becomes `failed`.
/// All CASE arms read the pre-update `retry_count`.
pub(crate) async fn mark_failed_with_retry(
    conn: &mut PgConnection,
    delivery_id: Uuid,
    error: &str,
    max_retries: u32,
) -> Result<()> {
    sqlx::query(
        r#"
        update deliveries
           set status         = case when retry_count + 1 >= $3 then 'failed' else 'pending' end,
               retry_count    = least(retry_count + 1, $3),
               claimed_at     = case when retry_count + 1 >= $3 then claimed_at else null end,
               delivered_at   = case when retry_count + 1 >= $3 then now() else delivered_at end,
               delivery_error = $2,
               updated_at     = now()
         where id = $1
        "#,
    )
    .bind(delivery_id)
    .bind(error)
    .bind(max_retries as i32)
    .execute(conn)
    .await
    .context("mark_failed_with_retry failed")?;
    Ok(())
}

/// Return stuck `claimed` rows to `pending`. Returns the count reset.
pub(crate) async fn reset_stale_deliveries(
    conn: &mut PgConnection,
    timeout_seconds: f64,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        update deliveries
           set status     = 'pending',
               claimed_at = null,
               updated_at = now()
         where status = 'claimed'
           and claimed_at < now() - make_interval(secs => $1)
        "#,
    )
    .bind(timeout_seconds)
    .execute(conn)
    .await
    .context("reset_stale_deliveries failed")?;
    Ok(result.rows_affected())
}

fn map_event_row(row: &sqlx::postgres::PgRow) -> Result<EventEnvelope> {
    Ok(EventEnvelope {
        event_id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) async fn get_event(
    conn: &mut PgConnection,
    event_id: Uuid,
) -> Result<Option<EventEnvelope>> {
    let row = sqlx::query(
        r#"
        select id, event_type, payload, created_at
          from events
         where id = $1
        "#,
    )
    .bind(event_id)
    .fetch_optional(conn)
    .await
    .context("get_event failed")?;

    row.as_ref().map(map_event_row).transpose()
}

pub(crate) async fn find_latest_by_type(
    conn: &mut PgConnection,
    event_type: &str,
) -> Result<Option<EventEnvelope>> {
    let row = sqlx::query(
        r#"
        select id, event_type, payload, created_at
          from events
         where event_type = $1
         order by created_at desc
         limit 1
        "#,
    )
    .bind(event_type)
    .fetch_optional(conn)
    .await
    .context("find_latest_by_type failed")?;

    row.as_ref().map(map_event_row).transpose()
}

pub(crate) async fn find_latest_by_type_and_field(
    conn: &mut PgConnection,
    event_type: &str,
    field: &str,
    value: &str,
) -> Result<Option<EventEnvelope>> {
    let row = sqlx::query(
        r#"
        select id, event_type, payload, created_at
          from events
         where event_type = $1
           and payload ->> $2 = $3
         order by created_at desc
         limit 1
        "#,
    )
    .bind(event_type)
    .bind(field)
    .bind(value)
    .fetch_optional(conn)
    .await
    .context("find_latest_by_type_and_field failed")?;

    row.as_ref().map(map_event_row).transpose()
}

/// Cursor-paginated changefeed over the events table.
pub(crate) async fn list_events(
    conn: &mut PgConnection,
    query: &ChangefeedQuery,
) -> Result<Vec<EventEnvelope>> {
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("select id, event_type, payload, created_at from events where true");

    if let Some(after) = query.after {
        qb.push(if query.newest_first {
            " and created_at < (select created_at from events where id = "
        } else {
            " and created_at > (select created_at from events where id = "
        });
        qb.push_bind(after);
        qb.push(")");
    }
    if let Some(types) = &query.event_types {
        qb.push(" and event_type = any(");
        qb.push_bind(types.clone());
        qb.push(")");
    }
    qb.push(if query.newest_first {
        " order by created_at desc"
    } else {
        " order by created_at asc"
    });
    qb.push(" limit ");
    qb.push_bind(query.limit);

    let rows = qb
        .build()
        .fetch_all(conn)
        .await
        .context("list_events failed")?;

    rows.iter().map(map_event_row).collect()
}

pub(crate) async fn count_events(
    conn: &mut PgConnection,
    event_types: Option<&[String]>,
) -> Result<i64> {
    let count: (i64,) = match event_types {
        Some(types) => sqlx::query_as(
            r#"
            select count(*)::bigint from events where event_type = any($1)
            "#,
        )
        .bind(types.to_vec())
        .fetch_one(conn)
        .await
        .context("count_events failed")?,
        None => sqlx::query_as("select count(*)::bigint from events")
            .fetch_one(conn)
            .await
            .context("count_events failed")?,
    };
    Ok(count.0)
}
