//! Deposition repository bound to a unit of work.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use osa_domain::deposition::{Deposition, DepositionStatus};
use osa_domain::ports::DepositionRepository;
use osa_srn::{ConventionSrn, DepositionSrn, RecordSrn};

use crate::uow::{conn, PgUnitOfWork};

#[derive(Debug, Clone)]
pub struct PgDepositionRepository {
    uow: Arc<PgUnitOfWork>,
}

impl PgDepositionRepository {
    pub fn new(uow: Arc<PgUnitOfWork>) -> Self {
        PgDepositionRepository { uow }
    }

    fn map_row(row: &sqlx::postgres::PgRow) -> Result<Deposition> {
        let srn: String = row.try_get("srn")?;
        let status: String = row.try_get("status")?;
        let convention_srn: String = row.try_get("convention_srn")?;
        let record_srn: Option<String> = row.try_get("record_srn")?;

        Ok(Deposition {
            srn: DepositionSrn::parse(&srn)?,
            status: DepositionStatus::parse(&status)?,
            metadata: row.try_get("metadata")?,
            files: serde_json::from_value(row.try_get("files")?)
                .context("decode deposition files column")?,
            convention_srn: ConventionSrn::parse(&convention_srn)?,
            owner_id: row.try_get("owner_id")?,
            record_srn: record_srn.as_deref().map(RecordSrn::parse).transpose()?,
            provenance: row.try_get("provenance")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    srn, status, metadata, files, provenance, record_srn,
    owner_id, convention_srn, created_at, updated_at
"#;

#[async_trait]
impl DepositionRepository for PgDepositionRepository {
    async fn save(&self, deposition: &Deposition) -> Result<()> {
        let files = serde_json::to_value(&deposition.files).context("encode deposition files")?;

        let mut guard = self.uow.lock_tx().await;
        sqlx::query(
            r#"
            insert into depositions (
                srn, status, metadata, files, provenance, record_srn,
                owner_id, convention_srn, created_at, updated_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            on conflict (srn) do update
                set status     = excluded.status,
                    metadata   = excluded.metadata,
                    files      = excluded.files,
                    provenance = excluded.provenance,
                    record_srn = excluded.record_srn,
                    updated_at = excluded.updated_at
            "#,
        )
        .bind(deposition.srn.render())
        .bind(deposition.status.as_str())
        .bind(&deposition.metadata)
        .bind(files)
        .bind(&deposition.provenance)
        .bind(deposition.record_srn.as_ref().map(RecordSrn::render))
        .bind(&deposition.owner_id)
        .bind(deposition.convention_srn.render())
        .bind(deposition.created_at)
        .bind(deposition.updated_at)
        .execute(conn(&mut guard)?)
        .await
        .context("save deposition failed")?;
        Ok(())
    }

    async fn get(&self, srn: &DepositionSrn) -> Result<Option<Deposition>> {
        let mut guard = self.uow.lock_tx().await;
        let row = sqlx::query(&format!(
            "select {SELECT_COLUMNS} from depositions where srn = $1"
        ))
        .bind(srn.render())
        .fetch_optional(conn(&mut guard)?)
        .await
        .context("get deposition failed")?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Deposition>> {
        let mut guard = self.uow.lock_tx().await;
        let rows = sqlx::query(&format!(
            "select {SELECT_COLUMNS} from depositions order by created_at desc limit $1 offset $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(conn(&mut guard)?)
        .await
        .context("list depositions failed")?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Deposition>> {
        let mut guard = self.uow.lock_tx().await;
        let rows = sqlx::query(&format!(
            "select {SELECT_COLUMNS} from depositions where owner_id = $1 \
             order by created_at desc limit $2 offset $3"
        ))
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(conn(&mut guard)?)
        .await
        .context("list depositions by owner failed")?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn count(&self) -> Result<i64> {
        let mut guard = self.uow.lock_tx().await;
        let (count,): (i64,) = sqlx::query_as("select count(*)::bigint from depositions")
            .fetch_one(conn(&mut guard)?)
            .await
            .context("count depositions failed")?;
        Ok(count)
    }

    async fn count_by_owner(&self, owner_id: &str) -> Result<i64> {
        let mut guard = self.uow.lock_tx().await;
        let (count,): (i64,) =
            sqlx::query_as("select count(*)::bigint from depositions where owner_id = $1")
                .bind(owner_id)
                .fetch_one(conn(&mut guard)?)
                .await
                .context("count depositions by owner failed")?;
        Ok(count)
    }
}
