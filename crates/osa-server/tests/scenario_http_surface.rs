//! Scenario: the HTTP surface, composed in-process without middleware.
//!
//! The bare router from `routes::build_router` is driven through
//! `tower::ServiceExt::oneshot`; the outbox behind it is the in-memory
//! event repository, so no database is required.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use osa_events::outbox::Outbox;
use osa_events::subscription::SubscriptionRegistry;
use osa_index::IndexBackend;
use osa_index::IndexRegistry;
use osa_server::routes::build_router;
use osa_server::state::AppState;
use osa_testkit::fixtures::DummyEvent;
use osa_testkit::{MemoryEventRepository, RecordingIndexBackend};

fn app_state(indexes: IndexRegistry) -> (Arc<MemoryEventRepository>, Arc<AppState>) {
    let repo = Arc::new(MemoryEventRepository::new());
    let outbox = Arc::new(Outbox::new(
        repo.clone(),
        Arc::new(SubscriptionRegistry::new()),
    ));
    let state = Arc::new(AppState::new(
        "cfg-hash".to_string(),
        outbox,
        vec![],
        indexes,
        None,
    ));
    (repo, state)
}

async fn get_json(router: axum::Router, uri: &str) -> anyhow::Result<(StatusCode, Value)> {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value = serde_json::from_slice(&bytes)?;
    Ok((status, value))
}

#[tokio::test]
async fn health_reports_service_and_version() -> anyhow::Result<()> {
    let (_repo, state) = app_state(IndexRegistry::new());
    let (status, body) = get_json(build_router(state), "/v1/health").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["service"], "osa-server");
    Ok(())
}

#[tokio::test]
async fn status_reports_config_hash_and_workers() -> anyhow::Result<()> {
    let (_repo, state) = app_state(IndexRegistry::new());
    let (status, body) = get_json(build_router(state), "/v1/status").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config_hash"], "cfg-hash");
    assert!(body["workers"].as_array().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn changefeed_pages_with_the_cursor() -> anyhow::Result<()> {
    let (repo, state) = app_state(IndexRegistry::new());
    {
        let outbox = Outbox::new(repo.clone(), Arc::new(SubscriptionRegistry::new()));
        for n in 0..3 {
            outbox.append(&DummyEvent::new(n)).await?;
        }
    }

    let (status, body) = get_json(build_router(state.clone()), "/v1/events?limit=2").await?;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    let cursor = body["next_cursor"].as_str().unwrap().to_string();

    let (_, page2) = get_json(
        build_router(state.clone()),
        &format!("/v1/events?limit=2&after={cursor}"),
    )
    .await?;
    assert_eq!(page2["events"].as_array().unwrap().len(), 1);

    let (_, count) = get_json(build_router(state), "/v1/events/count?types=DummyEvent").await?;
    assert_eq!(count["count"], 3);
    Ok(())
}

#[tokio::test]
async fn search_routes_cover_hits_unknown_index_and_unconfigured() -> anyhow::Result<()> {
    let keyword = Arc::new(RecordingIndexBackend::new("keyword"));
    keyword
        .ingest("urn:osa:n1.org:rec:r-1@1", &serde_json::json!({"title": "Solar spectra"}))
        .await?;
    let mut indexes = IndexRegistry::new();
    indexes.register(keyword);

    let (_repo, state) = app_state(indexes);

    let (status, body) = get_json(build_router(state.clone()), "/v1/search").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["indexes"], serde_json::json!(["keyword"]));

    let (status, body) =
        get_json(build_router(state.clone()), "/v1/search/keyword?q=solar").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["srn"], "urn:osa:n1.org:rec:r-1@1");
    assert_eq!(body["has_more"], false);

    let (status, _) = get_json(build_router(state), "/v1/search/vector?q=x").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // No indexes at all: the search surface is unavailable.
    let (_repo, empty_state) = app_state(IndexRegistry::new());
    let (status, _) = get_json(build_router(empty_state), "/v1/search/keyword?q=x").await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn stats_reports_event_and_index_counts() -> anyhow::Result<()> {
    let vector = Arc::new(RecordingIndexBackend::new("vector"));
    vector.ingest("urn:osa:n1.org:rec:r-2@1", &serde_json::json!({})).await?;
    vector.set_healthy(false);
    let mut indexes = IndexRegistry::new();
    indexes.register(vector);

    let (repo, state) = app_state(indexes);
    {
        let outbox = Outbox::new(repo.clone(), Arc::new(SubscriptionRegistry::new()));
        outbox.append(&DummyEvent::new(1)).await?;
    }

    let (status, body) = get_json(build_router(state), "/v1/stats").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"], 1);
    assert_eq!(body["records"], 0, "no pool wired in tests");
    assert_eq!(body["indexes"][0]["name"], "vector");
    assert_eq!(body["indexes"][0]["count"], 1);
    assert_eq!(body["indexes"][0]["healthy"], false);
    Ok(())
}
