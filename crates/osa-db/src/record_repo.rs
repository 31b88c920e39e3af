//! Record repository bound to a unit of work. Records are insert-only.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use osa_domain::ports::RecordRepository;
use osa_domain::record::Record;
use osa_srn::{DepositionSrn, RecordSrn};

use crate::uow::{conn, PgUnitOfWork};

#[derive(Debug, Clone)]
pub struct PgRecordRepository {
    uow: Arc<PgUnitOfWork>,
}

impl PgRecordRepository {
    pub fn new(uow: Arc<PgUnitOfWork>) -> Self {
        PgRecordRepository { uow }
    }

    fn map_row(row: &sqlx::postgres::PgRow) -> Result<Record> {
        let srn: String = row.try_get("srn")?;
        let deposition_srn: String = row.try_get("deposition_srn")?;

        Ok(Record {
            srn: RecordSrn::parse(&srn)?,
            deposition_srn: DepositionSrn::parse(&deposition_srn)?,
            metadata: row.try_get("metadata")?,
            indexes: serde_json::from_value(row.try_get("indexes")?)
                .context("decode indexes column")?,
            published_at: row.try_get("published_at")?,
        })
    }
}

#[async_trait]
impl RecordRepository for PgRecordRepository {
    async fn save(&self, record: &Record) -> Result<()> {
        let indexes = serde_json::to_value(&record.indexes).context("encode indexes")?;

        let mut guard = self.uow.lock_tx().await;
        sqlx::query(
            r#"
            insert into records (srn, deposition_srn, metadata, indexes, published_at)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.srn.render())
        .bind(record.deposition_srn.render())
        .bind(&record.metadata)
        .bind(indexes)
        .bind(record.published_at)
        .execute(conn(&mut guard)?)
        .await
        .context("save record failed")?;
        Ok(())
    }

    async fn get(&self, srn: &RecordSrn) -> Result<Option<Record>> {
        let mut guard = self.uow.lock_tx().await;
        let row = sqlx::query(
            r#"
            select srn, deposition_srn, metadata, indexes, published_at
              from records
             where srn = $1
            "#,
        )
        .bind(srn.render())
        .fetch_optional(conn(&mut guard)?)
        .await
        .context("get record failed")?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_by_deposition(&self, srn: &DepositionSrn) -> Result<Vec<Record>> {
        let mut guard = self.uow.lock_tx().await;
        let rows = sqlx::query(
            r#"
            select srn, deposition_srn, metadata, indexes, published_at
              from records
             where deposition_srn = $1
             order by published_at asc
            "#,
        )
        .bind(srn.render())
        .fetch_all(conn(&mut guard)?)
        .await
        .context("list records by deposition failed")?;

        rows.iter().map(Self::map_row).collect()
    }
}
