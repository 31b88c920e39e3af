//! Scenario: retry budget and exponential backoff on the deliveries table.
//!
//! Skips gracefully when `OSA_DATABASE_URL` is not set.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use osa_db::PgEventRepository;
use osa_events::envelope::EventEnvelope;
use osa_events::outbox::EventRepository;

fn unique(name: &str) -> String {
    format!("{name}-{}", Uuid::new_v4().simple())
}

async fn delivery_row(pool: &PgPool, delivery_id: Uuid) -> anyhow::Result<(String, i32, Option<String>)> {
    let row: (String, i32, Option<String>) = sqlx::query_as(
        "select status, retry_count, delivery_error from deliveries where id = $1",
    )
    .bind(delivery_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Push a delivery's `updated_at` into the past, simulating elapsed time.
async fn rewind_updated_at(pool: &PgPool, delivery_id: Uuid, secs: f64) -> anyhow::Result<()> {
    sqlx::query("update deliveries set updated_at = updated_at - make_interval(secs => $2) where id = $1")
        .bind(delivery_id)
        .bind(secs)
        .execute(pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn failed_delivery_backs_off_then_retries_then_fails_terminally() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;
    let repo = PgEventRepository::new(pool.clone());

    let event_type = unique("BackoffEvent");
    let group = unique("BackoffGroup");
    let max_retries = 2u32;

    let envelope = EventEnvelope {
        event_id: Uuid::new_v4(),
        event_type: event_type.clone(),
        payload: json!({"n": 1}),
        created_at: Utc::now(),
    };
    repo.save_with_deliveries(&envelope, &[group.clone()], None).await?;

    let types = vec![event_type.clone()];

    // First attempt fails below the budget: back to pending, retry spent.
    let claim = repo.claim_deliveries(&group, &types, 1).await?;
    assert_eq!(claim.events.len(), 1);
    let delivery_id = claim.events[0].delivery_id;
    repo.mark_failed_with_retry(delivery_id, "transient outage", max_retries).await?;

    let (status, retry_count, error) = delivery_row(&pool, delivery_id).await?;
    assert_eq!(status, "pending");
    assert_eq!(retry_count, 1);
    assert_eq!(error.as_deref(), Some("transient outage"));

    // Inside the 5-second backoff window the row is not claimable.
    let blocked = repo.claim_deliveries(&group, &types, 1).await?;
    assert!(blocked.events.is_empty(), "backoff window must filter the row out");

    // Window elapsed: claimable again.
    rewind_updated_at(&pool, delivery_id, 6.0).await?;
    let claim = repo.claim_deliveries(&group, &types, 1).await?;
    assert_eq!(claim.events.len(), 1, "row must be claimable after the backoff");

    // Second failure reaches the budget: terminal, retry_count == budget.
    repo.mark_failed_with_retry(delivery_id, "still broken", max_retries).await?;
    let (status, retry_count, _) = delivery_row(&pool, delivery_id).await?;
    assert_eq!(status, "failed");
    assert_eq!(retry_count as u32, max_retries);

    rewind_updated_at(&pool, delivery_id, 120.0).await?;
    let after = repo.claim_deliveries(&group, &types, 1).await?;
    assert!(after.events.is_empty(), "failed deliveries must never be reclaimed");
    Ok(())
}

#[tokio::test]
async fn stale_claim_is_reset_to_pending() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;
    let repo = PgEventRepository::new(pool.clone());

    let event_type = unique("StaleEvent");
    let group = unique("StaleGroup");

    let envelope = EventEnvelope {
        event_id: Uuid::new_v4(),
        event_type: event_type.clone(),
        payload: json!({}),
        created_at: Utc::now(),
    };
    repo.save_with_deliveries(&envelope, &[group.clone()], None).await?;

    let types = vec![event_type.clone()];
    let claim = repo.claim_deliveries(&group, &types, 1).await?;
    let delivery_id = claim.events[0].delivery_id;

    // Simulate a worker that claimed 600 seconds ago and died.
    sqlx::query("update deliveries set claimed_at = now() - interval '600 seconds' where id = $1")
        .bind(delivery_id)
        .execute(&pool)
        .await?;

    let reset = repo
        .reset_stale_deliveries(std::time::Duration::from_secs(300))
        .await?;
    assert!(reset >= 1, "the stale claim must be reset");

    let (status, claimed_at): (String, Option<chrono::DateTime<Utc>>) =
        sqlx::query_as("select status, claimed_at from deliveries where id = $1")
            .bind(delivery_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(status, "pending");
    assert!(claimed_at.is_none(), "claimed_at must be cleared");

    let reclaimed = repo.claim_deliveries(&group, &types, 1).await?;
    assert_eq!(reclaimed.events.len(), 1, "recovered delivery is claimable again");
    Ok(())
}
