//! Dynamic feature tables: one table per hook, created from the hook's
//! declared column schema.
//!
//! Table and column names are derived from hook-manifest identifiers, which
//! are validated here before they reach DDL — only `[a-z0-9_]` identifiers
//! (dashes folded to underscores) are accepted.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::Postgres;
use sqlx::query::Query;
use sqlx::postgres::PgArguments;

use osa_domain::hook::{ColumnType, FeatureColumn};
use osa_domain::ports::FeatureStore;
use osa_srn::RecordSrn;

use crate::uow::{conn, PgUnitOfWork};

/// Fold a hook name into a safe SQL identifier.
///
/// # Errors
/// Fails when the result would be empty or contain anything outside
/// `[a-z0-9_]`, or not start with a letter.
fn sql_identifier(name: &str) -> Result<String> {
    let folded: String = name
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' { '_' } else { c })
        .collect();
    let ok = !folded.is_empty()
        && folded.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && folded.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && folded.len() <= 48;
    if !ok {
        return Err(anyhow!("invalid feature identifier: {name:?}"));
    }
    Ok(folded)
}

fn table_name(hook_name: &str) -> Result<String> {
    Ok(format!("features_{}", sql_identifier(hook_name)?))
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Text => "text",
        ColumnType::Integer => "bigint",
        ColumnType::Float => "double precision",
        ColumnType::Boolean => "boolean",
        ColumnType::Json => "jsonb",
        ColumnType::Timestamp => "timestamptz",
    }
}

/// Bind one JSON value according to its declared column type. Missing and
/// null values bind as SQL NULL; `required` columns are enforced by the
/// table's NOT NULL constraint.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    column: &FeatureColumn,
    value: Option<&Value>,
) -> Result<Query<'q, Postgres, PgArguments>> {
    let value = value.filter(|v| !v.is_null());
    let query = match column.column_type {
        ColumnType::Text => query.bind(value.and_then(Value::as_str).map(str::to_string)),
        ColumnType::Integer => query.bind(value.and_then(Value::as_i64)),
        ColumnType::Float => query.bind(value.and_then(Value::as_f64)),
        ColumnType::Boolean => query.bind(value.and_then(Value::as_bool)),
        ColumnType::Json => query.bind(value.cloned()),
        ColumnType::Timestamp => {
            let ts = value
                .and_then(Value::as_str)
                .map(|s| {
                    DateTime::parse_from_rfc3339(s)
                        .map(|t| t.with_timezone(&Utc))
                        .with_context(|| format!("parse timestamp feature '{}': {s:?}", column.name))
                })
                .transpose()?;
            query.bind(ts)
        }
    };
    Ok(query)
}

#[derive(Debug, Clone)]
pub struct PgFeatureStore {
    uow: Arc<PgUnitOfWork>,
}

impl PgFeatureStore {
    pub fn new(uow: Arc<PgUnitOfWork>) -> Self {
        PgFeatureStore { uow }
    }
}

#[async_trait]
impl FeatureStore for PgFeatureStore {
    async fn create_table(&self, hook_name: &str, columns: &[FeatureColumn]) -> Result<()> {
        let table = table_name(hook_name)?;

        let mut ddl = format!(
            "create table if not exists \"{table}\" (\n    \
             id bigserial primary key,\n    \
             record_srn text not null references records (srn)"
        );
        for column in columns {
            let name = sql_identifier(&column.name)?;
            let null = if column.required { " not null" } else { "" };
            ddl.push_str(&format!(",\n    \"{name}\" {}{null}", sql_type(column.column_type)));
        }
        ddl.push_str(",\n    created_at timestamptz not null default now()\n)");

        let mut guard = self.uow.lock_tx().await;
        sqlx::query(&ddl)
            .execute(conn(&mut guard)?)
            .await
            .with_context(|| format!("create feature table '{table}' failed"))?;
        Ok(())
    }

    async fn insert_features(
        &self,
        hook_name: &str,
        columns: &[FeatureColumn],
        record_srn: &RecordSrn,
        rows: &[Map<String, Value>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = table_name(hook_name)?;

        let mut column_names = vec!["record_srn".to_string()];
        for column in columns {
            column_names.push(format!("\"{}\"", sql_identifier(&column.name)?));
        }
        let placeholders: Vec<String> = (1..=column_names.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "insert into \"{table}\" ({}) values ({})",
            column_names.join(", "),
            placeholders.join(", ")
        );

        let mut written = 0u64;
        let mut guard = self.uow.lock_tx().await;
        let connection = conn(&mut guard)?;
        for row in rows {
            let mut query = sqlx::query(&sql).bind(record_srn.render());
            for column in columns {
                query = bind_value(query, column, row.get(&column.name))?;
            }
            query
                .execute(&mut *connection)
                .await
                .with_context(|| format!("insert feature row into '{table}' failed"))?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_fold_dashes_and_reject_injection() {
        assert_eq!(sql_identifier("checksum").unwrap(), "checksum");
        assert_eq!(sql_identifier("Mass-Spec").unwrap(), "mass_spec");
        assert!(sql_identifier("x; drop table events").is_err());
        assert!(sql_identifier("").is_err());
        assert!(sql_identifier("9lives").is_err());
    }

    #[test]
    fn table_names_are_prefixed() {
        assert_eq!(table_name("checksum").unwrap(), "features_checksum");
    }
}
