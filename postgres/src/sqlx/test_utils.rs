use config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::quote_identifier;
use sqlx::{Connection, Executor, PgConnection, PgPool};

/// Creates a new Postgres database and returns a connection pool.
///
/// # Panics
/// Panics if connection or database creation fails.
pub async fn create_pg_database(config: &PgConnectionConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(
            "create database {};",
            quote_identifier(&config.name)
        ))
        .await
        .expect("Failed to create database");

    PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres")
}

/// Drops a Postgres database after terminating its remaining connections.
///
/// Errors are printed and otherwise ignored so cleanup never fails a test.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = match PgConnection::connect_with(&config.without_db()).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("warning: failed to connect to Postgres for cleanup: {e}");
            return;
        }
    };

    if let Err(e) = sqlx::query(
        r#"
        select pg_terminate_backend(pg_stat_activity.pid)
        from pg_stat_activity
        where pg_stat_activity.datname = $1
        and pid <> pg_backend_pid();"#,
    )
    .bind(&config.name)
    .execute(&mut connection)
    .await
    {
        eprintln!(
            "warning: failed to terminate connections for database {}: {}",
            config.name, e
        );
    }

    if let Err(e) = connection
        .execute(&*format!(
            "drop database if exists {};",
            quote_identifier(&config.name)
        ))
        .await
    {
        eprintln!("warning: failed to drop database {}: {}", config.name, e);
    }
}
