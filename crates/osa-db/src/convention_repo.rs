//! Convention repository bound to a unit of work. Conventions are
//! insert-only — a registered version is never mutated.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use osa_domain::convention::Convention;
use osa_domain::ports::ConventionRepository;
use osa_srn::{ConventionSrn, SchemaSrn};

use crate::uow::{conn, PgUnitOfWork};

#[derive(Debug, Clone)]
pub struct PgConventionRepository {
    uow: Arc<PgUnitOfWork>,
}

impl PgConventionRepository {
    pub fn new(uow: Arc<PgUnitOfWork>) -> Self {
        PgConventionRepository { uow }
    }

    fn map_row(row: &sqlx::postgres::PgRow) -> Result<Convention> {
        let srn: String = row.try_get("srn")?;
        let schema_srn: String = row.try_get("schema_srn")?;
        let source: Option<serde_json::Value> = row.try_get("source")?;

        Ok(Convention {
            srn: ConventionSrn::parse(&srn)?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            schema_srn: SchemaSrn::parse(&schema_srn)?,
            file_requirements: serde_json::from_value(row.try_get("file_requirements")?)
                .context("decode file_requirements column")?,
            hooks: serde_json::from_value(row.try_get("hooks")?)
                .context("decode hooks column")?,
            source: source
                .map(serde_json::from_value)
                .transpose()
                .context("decode source column")?,
            requires_manual_curation: row.try_get("requires_manual_curation")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    srn, title, description, schema_srn, file_requirements,
    hooks, source, requires_manual_curation, created_at
"#;

#[async_trait]
impl ConventionRepository for PgConventionRepository {
    async fn save(&self, convention: &Convention) -> Result<()> {
        let file_requirements = serde_json::to_value(&convention.file_requirements)
            .context("encode file_requirements")?;
        let hooks = serde_json::to_value(&convention.hooks).context("encode hooks")?;
        let source = convention
            .source
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("encode source")?;

        let mut guard = self.uow.lock_tx().await;
        sqlx::query(
            r#"
            insert into conventions (
                srn, title, description, schema_srn, file_requirements,
                hooks, source, requires_manual_curation, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(convention.srn.render())
        .bind(&convention.title)
        .bind(&convention.description)
        .bind(convention.schema_srn.render())
        .bind(file_requirements)
        .bind(hooks)
        .bind(source)
        .bind(convention.requires_manual_curation)
        .bind(convention.created_at)
        .execute(conn(&mut guard)?)
        .await
        .context("save convention failed")?;
        Ok(())
    }

    async fn get(&self, srn: &ConventionSrn) -> Result<Option<Convention>> {
        let mut guard = self.uow.lock_tx().await;
        let row = sqlx::query(&format!(
            "select {SELECT_COLUMNS} from conventions where srn = $1"
        ))
        .bind(srn.render())
        .fetch_optional(conn(&mut guard)?)
        .await
        .context("get convention failed")?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Convention>> {
        let mut guard = self.uow.lock_tx().await;
        let rows = sqlx::query(&format!(
            "select {SELECT_COLUMNS} from conventions order by created_at asc"
        ))
        .fetch_all(conn(&mut guard)?)
        .await
        .context("list conventions failed")?;

        rows.iter().map(Self::map_row).collect()
    }
}
