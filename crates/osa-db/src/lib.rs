//! Postgres adapter: pool bootstrap, embedded migrations, and the
//! repositories behind the domain ports.
//!
//! The event repository is the interesting part — it implements the
//! claim/ack/retry protocol the worker runtime is built on. Claims are a
//! single CTE statement using `FOR UPDATE SKIP LOCKED`, so concurrent
//! workers of one consumer group always receive disjoint delivery sets and
//! never block each other.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod convention_repo;
pub mod deposition_repo;
pub mod event_repo;
mod event_sql;
pub mod feature_store;
pub mod record_repo;
pub mod uow;

pub use convention_repo::PgConventionRepository;
pub use deposition_repo::PgDepositionRepository;
pub use event_repo::{PgEventRepository, TxEventRepository};
pub use feature_store::PgFeatureStore;
pub use record_repo::PgRecordRepository;
pub use uow::PgUnitOfWork;

pub const ENV_DB_URL: &str = "OSA_DATABASE_URL";

/// Connect to Postgres using `OSA_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper used by integration tests: connect via `OSA_DATABASE_URL`
/// and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'events'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_events_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_events_table: bool,
}

/// Published record count, for the stats surface.
pub async fn count_records(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("select count(*)::bigint from records")
        .fetch_one(pool)
        .await
        .context("count_records failed")?;
    Ok(count)
}

pub async fn count_depositions(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("select count(*)::bigint from depositions")
        .fetch_one(pool)
        .await
        .context("count_depositions failed")?;
    Ok(count)
}

pub async fn count_conventions(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("select count(*)::bigint from conventions")
        .fetch_one(pool)
        .await
        .context("count_conventions failed")?;
    Ok(count)
}

/// One row of the operator-facing delivery breakdown.
#[derive(Debug, Clone)]
pub struct DeliveryStatusCount {
    pub consumer_group: String,
    pub status: String,
    pub count: i64,
}

/// Delivery counts grouped by (consumer_group, status) — the operator's
/// view of queue depth, retries in flight and terminal failures.
pub async fn delivery_status_counts(pool: &PgPool) -> Result<Vec<DeliveryStatusCount>> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        r#"
        select consumer_group, status, count(*)::bigint
          from deliveries
         group by consumer_group, status
         order by consumer_group, status
        "#,
    )
    .fetch_all(pool)
    .await
    .context("delivery_status_counts failed")?;

    Ok(rows
        .into_iter()
        .map(|(consumer_group, status, count)| DeliveryStatusCount {
            consumer_group,
            status,
            count,
        })
        .collect())
}
