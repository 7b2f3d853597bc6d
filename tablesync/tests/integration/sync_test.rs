#![cfg(feature = "test-utils")]

use config::shared::{ColumnNamingConfig, ExtractSourceConfig, SyncProfileConfig};
use tablesync::error::ErrorKind;
use tablesync::orchestrator::{
    STATUS_CONFIG_ERROR, STATUS_MERGE_ERROR, STATUS_STAGING_ERROR, STATUS_SUCCESS, SyncOrchestrator,
    SyncOutcome, SyncReport, SyncStage,
};
use tablesync::settings::SyncConfig;
use tablesync::store::SyncStore;
use tablesync::store::postgres::PostgresSyncStore;
use tablesync::test_utils::database::{
    TEST_DATABASE_SCHEMA, TestDatabase, spawn_database, test_table_name,
};
use tablesync::test_utils::extract::build_extract;
use telemetry::tracing::init_test_tracing;

fn profile(allow_delete: bool, truncation_suffix: Option<&str>) -> SyncProfileConfig {
    SyncProfileConfig {
        name: "assets".to_string(),
        source: ExtractSourceConfig {
            path: "assets.csv".into(),
        },
        target_table: format!("{TEST_DATABASE_SCHEMA}.assets"),
        log_table: format!("{TEST_DATABASE_SCHEMA}.assets_log"),
        key_column: "id".to_string(),
        allow_delete,
        truncation_suffix: truncation_suffix.map(str::to_string),
        default_column_length: 500,
        empty_as_null: false,
        long_text_columns: vec![],
        column_types: Default::default(),
        naming: ColumnNamingConfig::default(),
    }
}

fn orchestrator(
    database: &TestDatabase,
    allow_delete: bool,
    truncation_suffix: Option<&str>,
) -> SyncOrchestrator<PostgresSyncStore> {
    let config = SyncConfig::from_profile(&profile(allow_delete, truncation_suffix)).unwrap();
    SyncOrchestrator::new(PostgresSyncStore::new(database.pool.clone()), config)
}

fn completed(outcome: SyncOutcome) -> SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::Failed(failure) => panic!("sync failed: {failure}"),
    }
}

async fn target_rows(database: &TestDatabase) -> Vec<(String, Option<String>)> {
    sqlx::query_as("select id, name from sync_test.assets order by id")
        .fetch_all(&database.pool)
        .await
        .unwrap()
}

async fn log_rows(database: &TestDatabase) -> Vec<(String, String)> {
    sqlx::query_as("select action, id from sync_test.assets_log order by syncdate, action, id")
        .fetch_all(&database.pool)
        .await
        .unwrap()
}

async fn staging_exists(database: &TestDatabase) -> bool {
    PostgresSyncStore::new(database.pool.clone())
        .table_columns(&test_table_name("_staging_assets"))
        .await
        .unwrap()
        .is_some()
}

#[tokio::test(flavor = "multi_thread")]
async fn first_run_inserts_and_second_run_updates_changed_rows() {
    init_test_tracing();
    let database = spawn_database().await;
    let orchestrator = orchestrator(&database, false, None);

    let first = build_extract(&["id", "name"], &[&[Some("1"), Some("A")], &[Some("2"), Some("B")]]);
    let report = completed(orchestrator.run(&first).await);
    assert_eq!(report.merge.inserted, 2);
    assert_eq!(
        log_rows(&database).await,
        vec![
            ("insert".to_string(), "1".to_string()),
            ("insert".to_string(), "2".to_string())
        ]
    );

    let second = build_extract(
        &["id", "name"],
        &[&[Some("1"), Some("A")], &[Some("2"), Some("C")]],
    );
    let outcome = orchestrator.run(&second).await;
    assert_eq!(outcome.status_code(), STATUS_SUCCESS);
    let report = completed(outcome);
    assert_eq!(report.merge.updated, 1);
    assert_eq!(report.merge.inserted, 0);

    assert_eq!(
        target_rows(&database).await,
        vec![
            ("1".to_string(), Some("A".to_string())),
            ("2".to_string(), Some("C".to_string()))
        ]
    );
    let updates: Vec<(String, Option<String>)> =
        sqlx::query_as("select id, name from sync_test.assets_log where action = 'update'")
            .fetch_all(&database.pool)
            .await
            .unwrap();
    assert_eq!(updates, vec![("2".to_string(), Some("C".to_string()))]);
    assert!(!staging_exists(&database).await);

    // Unchanged extract, no log entries.
    let report = completed(orchestrator.run(&second).await);
    assert!(report.merge.is_empty());
    assert_eq!(log_rows(&database).await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn deletes_are_logged_when_allowed() {
    init_test_tracing();
    let database = spawn_database().await;
    let orchestrator = orchestrator(&database, true, None);

    completed(
        orchestrator
            .run(&build_extract(
                &["id", "name"],
                &[&[Some("1"), Some("A")], &[Some("2"), Some("B")]],
            ))
            .await,
    );
    let report = completed(
        orchestrator
            .run(&build_extract(&["id", "name"], &[&[Some("1"), Some("A")]]))
            .await,
    );

    assert_eq!(report.merge.deleted, 1);
    assert_eq!(target_rows(&database).await, vec![("1".to_string(), Some("A".to_string()))]);
    let deletes: Vec<(String, Option<String>)> =
        sqlx::query_as("select id, name from sync_test.assets_log where action = 'delete'")
            .fetch_all(&database.pool)
            .await
            .unwrap();
    assert_eq!(deletes, vec![("2".to_string(), Some("B".to_string()))]);
}

#[tokio::test(flavor = "multi_thread")]
async fn truncation_keeps_values_within_the_column_length() {
    init_test_tracing();
    let database = spawn_database().await;
    database
        .execute("create table sync_test.assets (id varchar(100) primary key, name varchar(8))")
        .await;
    let orchestrator = orchestrator(&database, false, Some("..."));

    let report = completed(
        orchestrator
            .run(&build_extract(
                &["id", "name"],
                &[&[Some("1"), Some("a much longer name")], &[Some("2"), Some("short")]],
            ))
            .await,
    );

    assert_eq!(report.truncated_values, 1);
    assert_eq!(
        target_rows(&database).await,
        vec![
            ("1".to_string(), Some("a muc...".to_string())),
            ("2".to_string(), Some("short".to_string()))
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn extract_only_columns_do_not_fail_the_run() {
    init_test_tracing();
    let database = spawn_database().await;
    database
        .execute("create table sync_test.assets (id varchar(100) primary key, name varchar(500))")
        .await;
    let orchestrator = orchestrator(&database, false, None);

    let report = completed(
        orchestrator
            .run(&build_extract(
                &["id", "name", "colour"],
                &[&[Some("1"), Some("A"), Some("red")]],
            ))
            .await,
    );

    assert_eq!(report.extract_only_columns, vec!["colour".to_string()]);
    assert!(report.warnings >= 1);
    assert_eq!(target_rows(&database).await, vec![("1".to_string(), Some("A".to_string()))]);
    let target_columns = PostgresSyncStore::new(database.pool.clone())
        .table_columns(&test_table_name("assets"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(target_columns.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn typed_columns_are_cast_from_text() {
    init_test_tracing();
    let database = spawn_database().await;
    database
        .execute(
            "create table sync_test.assets (id varchar(100) primary key, name varchar(50), \
             floors integer, installed timestamp)",
        )
        .await;
    let orchestrator = orchestrator(&database, false, None);
    let extract = build_extract(
        &["id", "name", "floors", "installed"],
        &[
            &[Some("1"), Some("A"), Some("12"), Some("2024-03-01 10:15:00")],
            &[Some("2"), Some("B"), Some(""), Some(" ")],
        ],
    );

    let report = completed(orchestrator.run(&extract).await);
    assert_eq!(report.merge.inserted, 2);
    let report = completed(orchestrator.run(&extract).await);

    assert!(report.merge.is_empty());
    let floors: Vec<Option<i32>> =
        sqlx::query_scalar("select floors from sync_test.assets order by id")
            .fetch_all(&database.pool)
            .await
            .unwrap();
    assert_eq!(floors, vec![Some(12), None]);
    let installed: Option<String> =
        sqlx::query_scalar("select installed::text from sync_test.assets where id = '2'")
            .fetch_one(&database.pool)
            .await
            .unwrap();
    assert_eq!(installed, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_key_column_fails_before_any_table_is_created() {
    init_test_tracing();
    let database = spawn_database().await;
    let orchestrator = orchestrator(&database, false, None);

    let outcome = orchestrator
        .run(&build_extract(&["name"], &[&[Some("A")]]))
        .await;

    assert_eq!(outcome.status_code(), STATUS_CONFIG_ERROR);
    let target = PostgresSyncStore::new(database.pool.clone())
        .table_columns(&test_table_name("assets"))
        .await
        .unwrap();
    assert_eq!(target, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_keys_fail_the_staging_load() {
    init_test_tracing();
    let database = spawn_database().await;
    let orchestrator = orchestrator(&database, false, None);

    let outcome = orchestrator
        .run(&build_extract(
            &["id", "name"],
            &[&[Some("1"), Some("A")], &[Some("1"), Some("B")]],
        ))
        .await;

    assert_eq!(outcome.status_code(), STATUS_STAGING_ERROR);
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.error.kind(), ErrorKind::ConstraintViolation);
    assert_eq!(failure.stage, SyncStage::LoadStaging);
    assert!(target_rows(&database).await.is_empty());
    assert!(!staging_exists(&database).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_merge_leaves_target_and_log_untouched() {
    init_test_tracing();
    let database = spawn_database().await;
    database
        .execute(
            "create table sync_test.assets (id varchar(100) primary key, name varchar(500));
             insert into sync_test.assets values ('1', 'A');
             create table sync_test.assets_log (action varchar(10), id varchar(100), \
             syncdate timestamp, name varchar(1));",
        )
        .await;
    let orchestrator = orchestrator(&database, false, None);

    // The log column is too short for the new value, so the log write fails inside the merge.
    let outcome = orchestrator
        .run(&build_extract(
            &["id", "name"],
            &[&[Some("1"), Some("A")], &[Some("2"), Some("Bravo")]],
        ))
        .await;

    assert_eq!(outcome.status_code(), STATUS_MERGE_ERROR);
    assert_eq!(outcome.failure().unwrap().stage, SyncStage::Merge);
    assert_eq!(target_rows(&database).await, vec![("1".to_string(), Some("A".to_string()))]);
    assert!(log_rows(&database).await.is_empty());
    assert!(!staging_exists(&database).await);
}
