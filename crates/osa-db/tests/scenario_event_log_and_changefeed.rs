//! Scenario: event-log shape — per-subscriber delivery rows, audit-only
//! events, the (event, consumer_group) uniqueness constraint, and the
//! cursor-paginated changefeed.
//!
//! Skips gracefully when `OSA_DATABASE_URL` is not set.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use osa_db::PgEventRepository;
use osa_events::envelope::EventEnvelope;
use osa_events::outbox::{ChangefeedQuery, EventRepository};

fn unique(name: &str) -> String {
    format!("{name}-{}", Uuid::new_v4().simple())
}

fn envelope(event_type: &str, n: i64) -> EventEnvelope {
    EventEnvelope {
        event_id: Uuid::new_v4(),
        event_type: event_type.to_string(),
        payload: json!({"n": n}),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn one_delivery_row_per_group_and_audit_only_without_subscribers() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;
    let repo = PgEventRepository::new(pool.clone());

    let event_type = unique("FanoutEvent");
    let group_a = unique("GroupA");
    let group_b = unique("GroupB");

    let fanned = envelope(&event_type, 1);
    repo.save_with_deliveries(&fanned, &[group_a.clone(), group_b.clone()], Some("key"))
        .await?;

    let (count,): (i64,) =
        sqlx::query_as("select count(*)::bigint from deliveries where event_id = $1")
            .bind(fanned.event_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(count, 2, "one delivery per consumer group");

    let audit_only = envelope(&event_type, 2);
    repo.save_with_deliveries(&audit_only, &[], None).await?;

    let (count,): (i64,) =
        sqlx::query_as("select count(*)::bigint from deliveries where event_id = $1")
            .bind(audit_only.event_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(count, 0, "no subscribers, no delivery rows");
    assert!(repo.get(audit_only.event_id).await?.is_some(), "the event itself persists");
    Ok(())
}

#[tokio::test]
async fn duplicate_group_for_one_event_violates_the_unique_constraint() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;
    let repo = PgEventRepository::new(pool);

    let event_type = unique("UniqueEvent");
    let group = unique("UniqueGroup");

    let envelope = envelope(&event_type, 1);
    let result = repo
        .save_with_deliveries(&envelope, &[group.clone(), group.clone()], None)
        .await;
    assert!(
        result.is_err(),
        "two deliveries for one (event, consumer_group) must be rejected"
    );
    Ok(())
}

#[tokio::test]
async fn changefeed_pages_forward_with_the_cursor() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;
    let repo = PgEventRepository::new(pool);

    let event_type = unique("FeedEvent");
    let mut ids = Vec::new();
    for n in 0..5 {
        let envelope = envelope(&event_type, n);
        ids.push(envelope.event_id);
        repo.save_with_deliveries(&envelope, &[], None).await?;
        // Distinct created_at values keep the cursor unambiguous.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let types = Some(vec![event_type.clone()]);

    assert_eq!(repo.count_events(types.as_deref()).await?, 5);

    // Page 1: oldest first.
    let page1 = repo
        .list_events(&ChangefeedQuery {
            limit: 2,
            after: None,
            event_types: types.clone(),
            newest_first: false,
        })
        .await?;
    assert_eq!(page1.iter().map(|e| e.event_id).collect::<Vec<_>>(), ids[..2]);

    // Page 2 continues after the cursor.
    let page2 = repo
        .list_events(&ChangefeedQuery {
            limit: 2,
            after: Some(ids[1]),
            event_types: types.clone(),
            newest_first: false,
        })
        .await?;
    assert_eq!(page2.iter().map(|e| e.event_id).collect::<Vec<_>>(), ids[2..4]);

    // Newest-first view leads with the latest event.
    let newest = repo
        .list_events(&ChangefeedQuery {
            limit: 1,
            after: None,
            event_types: types.clone(),
            newest_first: true,
        })
        .await?;
    assert_eq!(newest[0].event_id, ids[4]);

    // Latest-by-type helpers agree. `->>` renders the JSON number as text,
    // so numeric payload fields match their string form.
    let latest = repo.find_latest_by_type(&event_type).await?.expect("latest");
    assert_eq!(latest.event_id, ids[4]);
    let latest_n3 = repo
        .find_latest_by_type_and_field(&event_type, "n", "3")
        .await?
        .expect("event with n=3");
    assert_eq!(latest_n3.event_id, ids[3]);
    Ok(())
}
