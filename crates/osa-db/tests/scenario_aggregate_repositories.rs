//! Scenario: aggregate repositories and the feature store against a real
//! Postgres, all bound to explicit units of work.
//!
//! Skips gracefully when `OSA_DATABASE_URL` is not set.

use chrono::Utc;
use serde_json::{json, Map};
use uuid::Uuid;

use osa_db::{
    PgConventionRepository, PgDepositionRepository, PgFeatureStore, PgRecordRepository,
    PgUnitOfWork,
};
use osa_domain::convention::{Convention, FileRequirements};
use osa_domain::deposition::{Deposition, DepositionFile};
use osa_domain::hook::{ColumnType, FeatureColumn};
use osa_domain::identity::Identity;
use osa_domain::ports::{
    ConventionRepository, DepositionRepository, FeatureStore, RecordRepository,
};
use osa_domain::record::Record;
use osa_srn::{ConventionSrn, DepositionSrn, RecordSrn, SchemaSrn, Semver};

fn unique_id() -> String {
    Uuid::new_v4().to_string()
}

fn convention(local_id: &str) -> Convention {
    Convention {
        srn: ConventionSrn::new("n1.org", local_id, Semver::parse("1.0.0").unwrap()).unwrap(),
        title: "Spectra submissions".to_string(),
        description: Some("test convention".to_string()),
        schema_srn: SchemaSrn::parse("urn:osa:n1.org:schema:base@1.0.0").unwrap(),
        file_requirements: FileRequirements {
            accepted_types: vec!["csv".to_string()],
            min_count: 1,
            max_count: 8,
            max_file_size: 1024 * 1024,
        },
        hooks: vec![],
        source: None,
        requires_manual_curation: false,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn deposition_round_trips_through_its_state_machine() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;

    let uow = PgUnitOfWork::begin(&pool, Identity::System).await?;
    let conventions = PgConventionRepository::new(uow.clone());
    let depositions = PgDepositionRepository::new(uow.clone());

    let convention = convention(&unique_id());
    conventions.save(&convention).await?;

    let srn = DepositionSrn::new("n1.org", &unique_id())?;
    let mut deposition = Deposition::new(
        srn.clone(),
        convention.srn.clone(),
        "u-1".to_string(),
        Utc::now(),
    );
    deposition.metadata = json!({"title": "Observation batch"});
    deposition.add_file(
        DepositionFile {
            name: "obs.csv".to_string(),
            size: 128,
            checksum: "cafebabe".to_string(),
            uploaded_at: Utc::now(),
            content_type: Some("text/csv".to_string()),
        },
        Utc::now(),
    )?;
    depositions.save(&deposition).await?;

    deposition.submit(Utc::now())?;
    depositions.save(&deposition).await?;
    uow.commit().await?;

    // A fresh unit of work sees the committed state.
    let uow = PgUnitOfWork::begin(&pool, Identity::System).await?;
    let depositions = PgDepositionRepository::new(uow.clone());
    let loaded = depositions.get(&srn).await?.expect("deposition persisted");
    assert_eq!(loaded.status.as_str(), "in_validation");
    assert_eq!(loaded.files.len(), 1);
    assert_eq!(loaded.files[0].checksum, "cafebabe");
    assert_eq!(loaded.metadata, json!({"title": "Observation batch"}));
    assert_eq!(loaded.convention_srn, convention.srn);
    uow.rollback().await?;
    Ok(())
}

#[tokio::test]
async fn rolled_back_unit_of_work_leaves_no_trace() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;

    let srn = DepositionSrn::new("n1.org", &unique_id())?;
    {
        let uow = PgUnitOfWork::begin(&pool, Identity::System).await?;
        let conventions = PgConventionRepository::new(uow.clone());
        let depositions = PgDepositionRepository::new(uow.clone());

        let convention = convention(&unique_id());
        conventions.save(&convention).await?;
        let deposition = Deposition::new(
            srn.clone(),
            convention.srn.clone(),
            "u-1".to_string(),
            Utc::now(),
        );
        depositions.save(&deposition).await?;
        uow.rollback().await?;
    }

    let uow = PgUnitOfWork::begin(&pool, Identity::System).await?;
    let depositions = PgDepositionRepository::new(uow.clone());
    assert!(
        depositions.get(&srn).await?.is_none(),
        "rollback must discard the aggregate write"
    );
    uow.rollback().await?;
    Ok(())
}

#[tokio::test]
async fn feature_store_creates_tables_and_inserts_typed_rows() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;

    let columns = vec![
        FeatureColumn {
            name: "digest".to_string(),
            column_type: ColumnType::Text,
            required: true,
        },
        FeatureColumn {
            name: "atom_count".to_string(),
            column_type: ColumnType::Integer,
            required: false,
        },
        FeatureColumn {
            name: "confidence".to_string(),
            column_type: ColumnType::Float,
            required: false,
        },
    ];

    // The feature table name derives from the hook name; make it unique so
    // reruns do not collide on stale schemas.
    let hook_name = format!("hook-{}", &Uuid::new_v4().simple().to_string()[..8]);

    let uow = PgUnitOfWork::begin(&pool, Identity::System).await?;
    let records = PgRecordRepository::new(uow.clone());
    let features = PgFeatureStore::new(uow.clone());

    let record_srn = RecordSrn::new("n1.org", &unique_id(), 1)?;
    records
        .save(&Record::new(
            record_srn.clone(),
            DepositionSrn::new("n1.org", &unique_id())?,
            json!({"title": "T"}),
            Utc::now(),
        ))
        .await?;

    features.create_table(&hook_name, &columns).await?;

    let mut row = Map::new();
    row.insert("digest".to_string(), json!("abc123"));
    row.insert("atom_count".to_string(), json!(42));
    row.insert("confidence".to_string(), json!(0.87));
    let written = features
        .insert_features(&hook_name, &columns, &record_srn, &[row])
        .await?;
    assert_eq!(written, 1);
    uow.commit().await?;

    let table = format!("features_{}", hook_name.replace('-', "_"));
    let (digest, atom_count, confidence): (String, Option<i64>, Option<f64>) = sqlx::query_as(
        &format!("select digest, atom_count, confidence from \"{table}\" where record_srn = $1"),
    )
    .bind(record_srn.render())
    .fetch_one(&pool)
    .await?;
    assert_eq!(digest, "abc123");
    assert_eq!(atom_count, Some(42));
    assert_eq!(confidence, Some(0.87));
    Ok(())
}

#[tokio::test]
async fn records_list_by_deposition() -> anyhow::Result<()> {
    if std::env::var(osa_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: OSA_DATABASE_URL not set");
        return Ok(());
    }
    let pool = osa_db::testkit_db_pool().await?;

    let uow = PgUnitOfWork::begin(&pool, Identity::System).await?;
    let records = PgRecordRepository::new(uow.clone());

    let deposition_srn = DepositionSrn::new("n1.org", &unique_id())?;
    for _ in 0..2 {
        records
            .save(&Record::new(
                RecordSrn::new("n1.org", &unique_id(), 1)?,
                deposition_srn.clone(),
                json!({}),
                Utc::now(),
            ))
            .await?;
    }
    uow.commit().await?;

    let uow = PgUnitOfWork::begin(&pool, Identity::System).await?;
    let records = PgRecordRepository::new(uow.clone());
    let listed = records.list_by_deposition(&deposition_srn).await?;
    assert_eq!(listed.len(), 2, "republishing yields one record per publish");
    uow.rollback().await?;
    Ok(())
}
