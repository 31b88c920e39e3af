//! osa-server entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config,
//! connects the pool, wires the worker pool and starts the HTTP server.
//! Handler wiring lives in `wiring.rs`; routes in `routes.rs`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use osa_config::NodeConfig;
use osa_db::PgEventRepository;
use osa_events::outbox::Outbox;
use osa_events::registry::EventTypeRegistry;
use osa_index::IndexRegistry;
use osa_pipeline::source::SourceSchedule;
use osa_server::{routes, state::AppState, wiring};
use osa_storage::LocalFileStorage;
use osa_worker::{ScheduleRegistration, WorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config_path = std::env::var("OSA_CONFIG").ok().map(PathBuf::from);
    let config = NodeConfig::load(config_path.as_deref())?;
    config.validate()?;
    let config_hash = config.config_hash()?;
    info!(node_domain = %config.node_domain, config_hash = %config_hash, "configuration loaded");

    let pool = osa_db::connect_from_env().await?;
    osa_db::migrate(&pool).await?;

    // Event vocabulary, frozen before anything subscribes.
    let mut registry = EventTypeRegistry::new();
    osa_events::register_all(&mut registry)?;

    let subscriptions = Arc::new(wiring::build_subscription_registry());

    let storage = Arc::new(LocalFileStorage::new(config.data_dir.clone()));
    // Index backends and the container runtime are plug-in adapters;
    // nothing is registered out of the box.
    let indexes = IndexRegistry::new();
    let runner = Arc::new(wiring::NullContainerRunner);

    let shared = Arc::new(wiring::SharedServices {
        pool: pool.clone(),
        subscriptions: subscriptions.clone(),
        storage,
        runner,
        indexes,
        node_domain: config.node_domain.clone(),
    });

    let pool_outbox = Arc::new(Outbox::new(
        Arc::new(PgEventRepository::new(pool.clone())),
        subscriptions.clone(),
    ));

    let mut schedules = Vec::new();
    for entry in &config.schedules {
        let schedule = Arc::new(SourceSchedule {
            outbox: pool_outbox.clone(),
        });
        schedules.push(ScheduleRegistration::new(
            &entry.id,
            &entry.cron,
            schedule,
            serde_json::json!({"convention": entry.convention, "limit": entry.limit}),
        )?);
    }

    let registrations = wiring::handler_registrations(&shared);
    let mut worker_pool = WorkerPool::new(
        pool_outbox.clone(),
        registrations,
        &registry,
        schedules,
        Duration::from_secs(config.stale_claim_interval_seconds),
    )
    .context("worker pool wiring invalid")?;

    let worker_states = worker_pool
        .workers()
        .iter()
        .map(|w| (w.name().to_string(), w.state_handle()))
        .collect();

    worker_pool.start().await?;

    let app_state = Arc::new(AppState::new(
        config_hash,
        pool_outbox,
        worker_states,
        shared.indexes.clone(),
        Some(pool.clone()),
    ));
    let app = routes::build_router(app_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("bind {}", config.http_addr))?;
    info!("osa-server listening on http://{}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    info!("shutting down worker pool");
    worker_pool
        .stop(Duration::from_secs(config.shutdown_timeout_seconds))
        .await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers(tower_http::cors::Any)
}
