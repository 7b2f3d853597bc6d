use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{PgPool, postgres::PgPoolOptions};

/// Connects to the configured database with a pool of at most `max_connections` connections.
pub async fn connect_to_database(config: &PgConnectionConfig) -> Result<PgPool, sqlx::Error> {
    let options = config.with_db();

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await?;

    Ok(pool)
}
