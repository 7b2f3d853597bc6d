#![cfg(feature = "test-utils")]

use postgres::schema::ColumnInfo;
use tablesync::error::ErrorKind;
use tablesync::merge::{MergePlan, MergeStats};
use tablesync::provision::{ColumnDefinition, ColumnType};
use tablesync::staging::StagingColumn;
use tablesync::store::SyncStore;
use tablesync::store::postgres::PostgresSyncStore;
use tablesync::test_utils::database::{spawn_database, test_table_name};
use telemetry::tracing::init_test_tracing;

fn varchar(name: &str, length: u32) -> ColumnDefinition {
    ColumnDefinition {
        name: name.to_string(),
        column_type: ColumnType::Varchar(length),
    }
}

fn staging_column(info: &ColumnInfo) -> StagingColumn {
    StagingColumn {
        name: info.name.clone(),
        info: info.clone(),
        from_target: true,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn catalog_reports_missing_and_created_tables() {
    init_test_tracing();
    let database = spawn_database().await;
    let store = PostgresSyncStore::new(database.pool.clone());
    let target = test_table_name("assets");

    assert_eq!(store.table_columns(&target).await.unwrap(), None);

    store
        .create_target_table(
            &target,
            &[
                varchar("asset_id", 100),
                varchar("Asset Name", 500),
                ColumnDefinition {
                    name: "unit_count".to_string(),
                    column_type: ColumnType::Integer,
                },
            ],
            "asset_id",
        )
        .await
        .unwrap();

    let columns = store.table_columns(&target).await.unwrap().unwrap();
    assert_eq!(
        columns,
        vec![
            ColumnInfo::new("asset_id", "character varying(100)", Some(100), false),
            ColumnInfo::new("Asset Name", "character varying(500)", Some(500), true),
            ColumnInfo::new("unit_count", "integer", None, true),
        ]
    );
    assert!(store.has_unique_index(&target, "asset_id").await.unwrap());
    assert!(!store.has_unique_index(&target, "Asset Name").await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn log_table_copies_target_types() {
    init_test_tracing();
    let database = spawn_database().await;
    let store = PostgresSyncStore::new(database.pool.clone());
    let target = test_table_name("assets");
    let log = test_table_name("assets_log");

    store
        .create_target_table(
            &target,
            &[varchar("asset_id", 100), varchar("label", 250)],
            "asset_id",
        )
        .await
        .unwrap();
    store
        .create_log_table(&log, &target, "asset_id", &["label".to_string()])
        .await
        .unwrap();

    let columns = store.table_columns(&log).await.unwrap().unwrap();
    let rendered: Vec<(String, String)> = columns
        .into_iter()
        .map(|column| (column.name, column.data_type))
        .collect();
    assert_eq!(
        rendered,
        vec![
            ("action".to_string(), "character varying(10)".to_string()),
            ("asset_id".to_string(), "character varying(100)".to_string()),
            ("syncdate".to_string(), "timestamp without time zone".to_string()),
            ("label".to_string(), "character varying(250)".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn staging_load_is_atomic() {
    init_test_tracing();
    let database = spawn_database().await;
    let store = PostgresSyncStore::new(database.pool.clone());
    let target = test_table_name("assets");
    let staging = test_table_name("_staging_assets");

    store
        .create_target_table(&target, &[varchar("asset_id", 100), varchar("label", 3)], "asset_id")
        .await
        .unwrap();
    let columns: Vec<StagingColumn> = store
        .table_columns(&target)
        .await
        .unwrap()
        .unwrap()
        .iter()
        .map(staging_column)
        .collect();
    store
        .create_staging_table(&staging, &target, &columns, "asset_id")
        .await
        .unwrap();

    let err = store
        .load_staging(
            &staging,
            &columns,
            vec![
                vec![Some("1".to_string()), Some("abc".to_string())],
                vec![Some("2".to_string()), Some("abcd".to_string())],
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueTooLong);

    let err = store
        .load_staging(
            &staging,
            &columns,
            vec![
                vec![Some("1".to_string()), None],
                vec![Some("1".to_string()), None],
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let count: i64 = sqlx::query_scalar(&format!(
        "select count(*) from {}",
        staging.as_quoted_identifier()
    ))
    .fetch_one(&database.pool)
    .await
    .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn loads_larger_than_one_statement_are_chunked() {
    init_test_tracing();
    let database = spawn_database().await;
    let store = PostgresSyncStore::new(database.pool.clone());
    let target = test_table_name("assets");
    let staging = test_table_name("_staging_assets");

    store
        .create_target_table(&target, &[varchar("asset_id", 100), varchar("label", 20)], "asset_id")
        .await
        .unwrap();
    let columns: Vec<StagingColumn> = store
        .table_columns(&target)
        .await
        .unwrap()
        .unwrap()
        .iter()
        .map(staging_column)
        .collect();
    store
        .create_staging_table(&staging, &target, &columns, "asset_id")
        .await
        .unwrap();

    let rows = (0..2500)
        .map(|i| vec![Some(i.to_string()), Some(format!("label {i}"))])
        .collect();
    let loaded = store.load_staging(&staging, &columns, rows).await.unwrap();

    assert_eq!(loaded, 2500);
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_writes_target_and_log_in_one_transaction() {
    init_test_tracing();
    let database = spawn_database().await;
    let store = PostgresSyncStore::new(database.pool.clone());
    let target = test_table_name("assets");
    let staging = test_table_name("_staging_assets");
    let log = test_table_name("assets_log");

    database
        .execute(
            "create table sync_test.assets (asset_id varchar(100) primary key, label varchar(20));
             insert into sync_test.assets values ('1', 'same'), ('2', 'old'), ('3', 'gone');
             create table sync_test._staging_assets (asset_id varchar(100) primary key, label varchar(20));
             insert into sync_test._staging_assets values ('1', 'same'), ('2', 'new'), ('4', 'added');",
        )
        .await;
    store
        .create_log_table(&log, &target, "asset_id", &["label".to_string()])
        .await
        .unwrap();

    let plan = MergePlan {
        target: target.clone(),
        staging,
        log: log.clone(),
        key_column: "asset_id".to_string(),
        log_key_column: "asset_id".to_string(),
        update_columns: vec!["label".to_string()],
        insert_columns: vec!["asset_id".to_string(), "label".to_string()],
        log_columns: vec!["label".to_string()],
        allow_delete: true,
    };
    let stats = store.merge(&plan).await.unwrap();
    assert_eq!(
        stats,
        MergeStats {
            inserted: 1,
            updated: 1,
            deleted: 1
        }
    );

    let target_rows: Vec<(String, Option<String>)> =
        sqlx::query_as("select asset_id, label from sync_test.assets order by asset_id")
            .fetch_all(&database.pool)
            .await
            .unwrap();
    assert_eq!(
        target_rows,
        vec![
            ("1".to_string(), Some("same".to_string())),
            ("2".to_string(), Some("new".to_string())),
            ("4".to_string(), Some("added".to_string())),
        ]
    );

    let log_rows: Vec<(String, String, Option<String>)> =
        sqlx::query_as("select action, asset_id, label from sync_test.assets_log order by asset_id")
            .fetch_all(&database.pool)
            .await
            .unwrap();
    assert_eq!(
        log_rows,
        vec![
            ("update".to_string(), "2".to_string(), Some("new".to_string())),
            ("delete".to_string(), "3".to_string(), Some("gone".to_string())),
            ("insert".to_string(), "4".to_string(), Some("added".to_string())),
        ]
    );

    // Merging again changes nothing.
    assert!(store.merge(&plan).await.unwrap().is_empty());
}
