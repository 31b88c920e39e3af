//! Axum router and HTTP handlers.
//!
//! `build_router` returns the bare router so tests can compose it without
//! middleware; `main.rs` attaches tracing and CORS layers.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use osa_events::envelope::EventEnvelope;
use osa_events::outbox::ChangefeedQuery;
use osa_events::worker_config::WorkerState;

use crate::state::{AppState, BuildInfo};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/stats", get(stats))
        .route("/v1/events", get(list_events))
        .route("/v1/events/count", get(count_events))
        .route("/v1/search", get(list_indexes))
        .route("/v1/search/:index", get(search_index))
        .with_state(state)
}

fn internal_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "internal error"})),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    #[serde(flatten)]
    build: BuildInfo,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        build: state.build.clone(),
    })
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WorkerStatusEntry {
    name: String,
    #[serde(flatten)]
    state: WorkerState,
}

#[derive(Serialize)]
struct DeliveryBreakdownEntry {
    consumer_group: String,
    status: String,
    count: i64,
}

#[derive(Serialize)]
struct StatusResponse {
    uptime_secs: u64,
    config_hash: String,
    workers: Vec<WorkerStatusEntry>,
    /// Delivery counts by (consumer_group, status); empty without a pool.
    deliveries: Vec<DeliveryBreakdownEntry>,
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    let workers = state
        .worker_snapshots()
        .into_iter()
        .map(|(name, worker_state)| WorkerStatusEntry {
            name,
            state: worker_state,
        })
        .collect();

    let deliveries = match &state.pool {
        Some(pool) => match osa_db::delivery_status_counts(pool).await {
            Ok(counts) => counts
                .into_iter()
                .map(|c| DeliveryBreakdownEntry {
                    consumer_group: c.consumer_group,
                    status: c.status,
                    count: c.count,
                })
                .collect(),
            Err(err) => return internal_error(err),
        },
        None => Vec::new(),
    };

    Json(StatusResponse {
        uptime_secs: state.uptime_secs(),
        config_hash: state.config_hash.clone(),
        workers,
        deliveries,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stats
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct IndexStats {
    name: String,
    count: usize,
    healthy: bool,
}

#[derive(Serialize)]
struct StatsResponse {
    records: i64,
    depositions: i64,
    conventions: i64,
    events: i64,
    indexes: Vec<IndexStats>,
}

async fn stats(State(state): State<Arc<AppState>>) -> Response {
    let events = match state.outbox.count_events(None).await {
        Ok(count) => count,
        Err(err) => return internal_error(err),
    };

    let (records, depositions, conventions) = match &state.pool {
        Some(pool) => {
            let gathered = async {
                anyhow::Ok((
                    osa_db::count_records(pool).await?,
                    osa_db::count_depositions(pool).await?,
                    osa_db::count_conventions(pool).await?,
                ))
            };
            match gathered.await {
                Ok(counts) => counts,
                Err(err) => return internal_error(err),
            }
        }
        None => (0, 0, 0),
    };

    let mut indexes = Vec::new();
    for (name, backend) in state.indexes.iter() {
        // A broken backend reports unhealthy rather than failing the route.
        let (count, healthy) = match backend.count().await {
            Ok(count) => (count, backend.health().await),
            Err(_) => (0, false),
        };
        indexes.push(IndexStats {
            name: name.to_string(),
            count,
            healthy,
        });
    }

    Json(StatsResponse {
        records,
        depositions,
        conventions,
        events,
        indexes,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/search, GET /v1/search/:index
// ---------------------------------------------------------------------------

async fn list_indexes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({"indexes": state.indexes.names()}))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    index: String,
    total: usize,
    has_more: bool,
    results: Vec<osa_index::QueryHit>,
}

async fn search_index(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(index): axum::extract::Path<String>,
    Query(params): Query<SearchParams>,
) -> Response {
    if state.indexes.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "no search indexes configured"})),
        )
            .into_response();
    }
    let backend = match state.indexes.get(&index) {
        Some(backend) => backend,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": format!("index '{index}' not found"),
                    "available": state.indexes.names(),
                })),
            )
                .into_response();
        }
    };

    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    // Fetch one past the window to learn whether more results exist.
    let result = match backend.query(&params.q, params.offset + limit + 1).await {
        Ok(result) => result,
        Err(err) => return internal_error(err),
    };

    let window: Vec<_> = result.hits.into_iter().skip(params.offset).collect();
    let has_more = window.len() > limit;
    let results: Vec<_> = window.into_iter().take(limit).collect();

    Json(SearchResponse {
        query: params.q,
        index,
        total: results.len(),
        has_more,
        results,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/events — changefeed cursor API
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EventsParams {
    limit: Option<i64>,
    /// Cursor: event id to continue after.
    after: Option<Uuid>,
    /// Comma-separated event type names.
    types: Option<String>,
    #[serde(default)]
    newest_first: bool,
}

const MAX_PAGE_SIZE: i64 = 500;

fn parse_types(raw: &Option<String>) -> Option<Vec<String>> {
    let raw = raw.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw.split(',').map(|t| t.trim().to_string()).collect())
}

#[derive(Serialize)]
struct EventsResponse {
    events: Vec<EventEnvelope>,
    /// Pass as `after` to fetch the next page.
    next_cursor: Option<Uuid>,
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsParams>,
) -> Response {
    let query = ChangefeedQuery {
        limit: params.limit.unwrap_or(50).clamp(1, MAX_PAGE_SIZE),
        after: params.after,
        event_types: parse_types(&params.types),
        newest_first: params.newest_first,
    };
    match state.outbox.list_events(&query).await {
        Ok(events) => {
            let next_cursor = events.last().map(|e| e.event_id);
            Json(EventsResponse { events, next_cursor }).into_response()
        }
        Err(err) => internal_error(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/events/count
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CountParams {
    types: Option<String>,
}

async fn count_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CountParams>,
) -> Response {
    let types = parse_types(&params.types);
    match state.outbox.count_events(types.as_deref()).await {
        Ok(count) => Json(serde_json::json!({"count": count})).into_response(),
        Err(err) => internal_error(err),
    }
}
