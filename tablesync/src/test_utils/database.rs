use config::shared::{PgConnectionConfig, TlsConfig};
use postgres::schema::TableName;
use postgres::sqlx::test_utils::{create_pg_database, drop_pg_database};
use sqlx::PgPool;
use tokio::runtime::Handle;
use uuid::Uuid;

/// Schema holding the tables of a test.
pub const TEST_DATABASE_SCHEMA: &str = "sync_test";

/// Creates a [`TableName`] in the test schema.
pub fn test_table_name(name: &str) -> TableName {
    TableName {
        schema: TEST_DATABASE_SCHEMA.to_owned(),
        name: name.to_owned(),
    }
}

/// Connection settings of a fresh, uniquely named database on the local test server.
///
/// Configuration is read from environment variables:
/// - `TESTS_DATABASE_HOST`: Postgres server hostname (required)
/// - `TESTS_DATABASE_PORT`: Postgres server port (required)
/// - `TESTS_DATABASE_USERNAME`: Database user (required)
/// - `TESTS_DATABASE_PASSWORD`: Database password (optional)
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
        max_connections: PgConnectionConfig::DEFAULT_MAX_CONNECTIONS,
    }
}

/// A throwaway database with the test schema, dropped with the value.
///
/// Dropping blocks on the current runtime, so tests using it need the multi-threaded flavor.
pub struct TestDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Runs one or more `;`-separated statements and panics on failure.
    pub async fn execute(&self, sql: &str) {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|err| panic!("failed to execute `{sql}`: {err}"));
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let config = self.config.clone();
        tokio::task::block_in_place(move || {
            Handle::current().block_on(async move {
                pool.close().await;
                drop_pg_database(&config).await;
            });
        });
    }
}

/// Creates a new database with a random name and the [`TEST_DATABASE_SCHEMA`] schema.
///
/// # Panics
///
/// Panics if the database or the schema cannot be created.
pub async fn spawn_database() -> TestDatabase {
    let config = local_pg_connection_config();
    let pool = create_pg_database(&config).await;

    sqlx::query(&format!("create schema {TEST_DATABASE_SCHEMA}"))
        .execute(&pool)
        .await
        .expect("Failed to create test schema");

    TestDatabase { config, pool }
}
