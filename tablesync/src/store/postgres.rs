use postgres::catalog;
use postgres::schema::{ColumnInfo, TableName};
use sqlx::PgPool;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::merge::{MergePlan, MergeStats};
use crate::provision::ColumnDefinition;
use crate::sql;
use crate::staging::StagingColumn;
use crate::store::base::SyncStore;
use crate::types::Row;

/// [`SyncStore`] running every step against Postgres.
///
/// Each step takes a connection from the shared pool for its own duration, so the staging
/// relation is an ordinary unlogged table that outlives the connection that created it.
#[derive(Debug, Clone)]
pub struct PostgresSyncStore {
    pool: PgPool,
}

impl PostgresSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn query_error(context: String) -> impl FnOnce(sqlx::Error) -> SyncError {
    move |err| SyncError::from(err).with_context(context)
}

impl SyncStore for PostgresSyncStore {
    async fn table_columns(&self, table: &TableName) -> SyncResult<Option<Vec<ColumnInfo>>> {
        let columns = catalog::table_columns(&self.pool, table)
            .await
            .map_err(query_error(format!("reading columns of {table}")))?;

        Ok(columns)
    }

    async fn has_unique_index(&self, table: &TableName, column: &str) -> SyncResult<bool> {
        let exists = catalog::has_unique_index(&self.pool, table, column)
            .await
            .map_err(query_error(format!("reading indexes of {table}")))?;

        Ok(exists)
    }

    async fn create_target_table(
        &self,
        table: &TableName,
        columns: &[ColumnDefinition],
        key_column: &str,
    ) -> SyncResult<()> {
        let statement = sql::create_target_table(table, columns, key_column);
        debug!(%table, "creating target table");

        sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(query_error(format!("creating table {table}")))?;

        Ok(())
    }

    async fn create_log_table(
        &self,
        log: &TableName,
        target: &TableName,
        key_column: &str,
        log_columns: &[String],
    ) -> SyncResult<()> {
        let statement = sql::create_log_table(log, target, key_column, log_columns);
        debug!(table = %log, "creating log table");

        sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(query_error(format!("creating log table {log}")))?;

        Ok(())
    }

    async fn create_staging_table(
        &self,
        staging: &TableName,
        target: &TableName,
        columns: &[StagingColumn],
        key_column: &str,
    ) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&sql::drop_table(staging))
            .execute(&mut *tx)
            .await
            .map_err(query_error(format!("dropping leftover staging table {staging}")))?;
        sqlx::query(&sql::create_staging_table(staging, target, columns))
            .execute(&mut *tx)
            .await
            .map_err(query_error(format!("creating staging table {staging}")))?;
        sqlx::query(&sql::add_primary_key(staging, key_column))
            .execute(&mut *tx)
            .await
            .map_err(query_error(format!("adding primary key to {staging}")))?;

        tx.commit().await?;

        Ok(())
    }

    async fn load_staging(
        &self,
        staging: &TableName,
        columns: &[StagingColumn],
        rows: Vec<Row>,
    ) -> SyncResult<u64> {
        let chunk_size = sql::rows_per_insert(columns.len());
        let mut tx = self.pool.begin().await?;

        let mut loaded = 0;
        for chunk in rows.chunks(chunk_size) {
            let statement = sql::insert_rows(staging, columns, chunk.len());
            let mut query = sqlx::query(&statement);
            for row in chunk {
                for cell in row {
                    query = query.bind(cell.as_deref());
                }
            }

            let result = query
                .execute(&mut *tx)
                .await
                .map_err(query_error(format!("loading staging table {staging}")))?;
            loaded += result.rows_affected();
        }

        tx.commit().await?;
        debug!(table = %staging, rows = loaded, "loaded staging table");

        Ok(loaded)
    }

    async fn strip_characters(
        &self,
        table: &TableName,
        column: &str,
        characters: &[char],
    ) -> SyncResult<u64> {
        let statement = sql::strip_characters(table, column, characters);
        let result = sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(query_error(format!("cleaning column `{column}` of {table}")))?;

        Ok(result.rows_affected())
    }

    async fn merge(&self, plan: &MergePlan) -> SyncResult<MergeStats> {
        let target = &plan.target;
        let mut tx = self.pool.begin().await?;
        let mut stats = MergeStats::default();

        stats.inserted = sqlx::query(&sql::merge_insert(plan))
            .execute(&mut *tx)
            .await
            .map_err(query_error(format!("inserting new rows into {target}")))?
            .rows_affected();

        if let Some(statement) = sql::merge_update(plan) {
            stats.updated = sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(query_error(format!("updating changed rows of {target}")))?
                .rows_affected();
        }

        if plan.allow_delete {
            stats.deleted = sqlx::query(&sql::merge_delete(plan))
                .execute(&mut *tx)
                .await
                .map_err(query_error(format!("deleting removed rows from {target}")))?
                .rows_affected();
        }

        tx.commit().await?;

        Ok(stats)
    }

    async fn drop_table(&self, table: &TableName) -> SyncResult<()> {
        sqlx::query(&sql::drop_table(table))
            .execute(&self.pool)
            .await
            .map_err(query_error(format!("dropping {table}")))?;

        Ok(())
    }
}
