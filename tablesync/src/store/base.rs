use std::future::Future;

use postgres::schema::{ColumnInfo, TableName};

use crate::error::SyncResult;
use crate::merge::{MergePlan, MergeStats};
use crate::provision::ColumnDefinition;
use crate::staging::StagingColumn;
use crate::types::Row;

/// Database operations a sync run is built from.
///
/// Every method is one discrete step of a run. Implementations acquire whatever connection they
/// need for the step and release it before returning, on success and on error.
///
/// [`SyncStore::load_staging`] and [`SyncStore::merge`] must be atomic: either all of their
/// effects are visible afterwards or none are.
pub trait SyncStore {
    /// Returns the live columns of `table` in ordinal order, or `None` when it does not exist.
    fn table_columns(
        &self,
        table: &TableName,
    ) -> impl Future<Output = SyncResult<Option<Vec<ColumnInfo>>>> + Send;

    /// Returns `true` when `column` alone is covered by a unique index of `table`.
    fn has_unique_index(
        &self,
        table: &TableName,
        column: &str,
    ) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Creates the target table unless it already exists. `key_column` becomes its primary key.
    fn create_target_table(
        &self,
        table: &TableName,
        columns: &[ColumnDefinition],
        key_column: &str,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Creates the log table unless it already exists, copying the types of `key_column` and
    /// `log_columns` from `target`.
    fn create_log_table(
        &self,
        log: &TableName,
        target: &TableName,
        key_column: &str,
        log_columns: &[String],
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Drops any leftover `staging` relation and creates it empty with `columns`, in order, and
    /// a primary key on `key_column`.
    fn create_staging_table(
        &self,
        staging: &TableName,
        target: &TableName,
        columns: &[StagingColumn],
        key_column: &str,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Loads `rows`, aligned to `columns`, into `staging` in a single transaction and returns
    /// the number of loaded rows.
    fn load_staging(
        &self,
        staging: &TableName,
        columns: &[StagingColumn],
        rows: Vec<Row>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Removes every occurrence of `characters` from the values of `column` and returns the
    /// number of rows scanned.
    fn strip_characters(
        &self,
        table: &TableName,
        column: &str,
        characters: &[char],
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Applies the inserts, updates and deletes described by `plan` to the target table and
    /// records each of them in the log table, in a single transaction.
    fn merge(&self, plan: &MergePlan) -> impl Future<Output = SyncResult<MergeStats>> + Send;

    /// Drops `table` if it exists.
    fn drop_table(&self, table: &TableName) -> impl Future<Output = SyncResult<()>> + Send;
}
