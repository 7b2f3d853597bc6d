//! Sequencing of a sync run.
//!
//! A run goes through reconciliation, provisioning, staging creation, the staging load, the
//! merge and the staging cleanup, strictly in that order. Any failure ends the run; nothing is
//! resumed, and re-running with the same extract is a no-op for the target.

use std::fmt;

use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::merge::{MergePlan, MergeStats};
use crate::provision::{ensure_log_table, ensure_target_table};
use crate::reconcile::{ColumnPlan, reconcile_columns};
use crate::settings::SyncConfig;
use crate::staging::{
    LoadOptions, STREET_NUMBER_STRIPPED_CHARACTERS, prepare_rows, staging_columns,
    street_number_columns,
};
use crate::store::SyncStore;
use crate::sync_error;
use crate::types::Extract;

/// Status of a successful run.
pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_CONFIG_ERROR: i32 = 1;
pub const STATUS_SCHEMA_ERROR: i32 = 2;
pub const STATUS_STAGING_ERROR: i32 = 3;
pub const STATUS_MERGE_ERROR: i32 = 4;
pub const STATUS_CONNECTION_ERROR: i32 = 5;
pub const STATUS_EXTRACT_ERROR: i32 = 6;
pub const STATUS_OTHER_ERROR: i32 = 9;

/// Step of a run, recorded on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Reconcile,
    Provision,
    CreateStaging,
    LoadStaging,
    Merge,
    DropStaging,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            SyncStage::Reconcile => "reconcile_columns",
            SyncStage::Provision => "ensure_schema",
            SyncStage::CreateStaging => "create_staging",
            SyncStage::LoadStaging => "load_staging",
            SyncStage::Merge => "diff_merge",
            SyncStage::DropStaging => "drop_staging",
        };
        f.write_str(stage)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub profile: String,
    pub rows_received: usize,
    /// Rows the extract reader dropped before the run.
    pub rows_dropped: usize,
    pub rows_loaded: u64,
    pub truncated_values: usize,
    pub merge: MergeStats,
    pub warnings: usize,
    /// Extract columns that were staged but could not be merged.
    pub extract_only_columns: Vec<String>,
}

/// A failed run: the stage that failed and why.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub stage: SyncStage,
    pub error: SyncError,
}

impl SyncFailure {
    pub fn new(stage: SyncStage, error: SyncError) -> Self {
        Self { stage, error }
    }

    /// Integer status reported for this failure.
    ///
    /// Configuration, connection and extract errors map to their own status wherever they
    /// occur; every other error takes the status of the stage it happened in.
    pub fn status_code(&self) -> i32 {
        let kind = self.error.kind();
        if kind.is_config_error() {
            return STATUS_CONFIG_ERROR;
        }
        if kind.is_connection_error() {
            return STATUS_CONNECTION_ERROR;
        }
        if kind == ErrorKind::ExtractError {
            return STATUS_EXTRACT_ERROR;
        }

        match self.stage {
            SyncStage::Reconcile | SyncStage::Provision => STATUS_SCHEMA_ERROR,
            SyncStage::CreateStaging | SyncStage::LoadStaging | SyncStage::DropStaging => {
                STATUS_STAGING_ERROR
            }
            SyncStage::Merge => STATUS_MERGE_ERROR,
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync failed in {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for SyncFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result of [`SyncOrchestrator::run`].
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Failed(SyncFailure),
}

impl SyncOutcome {
    pub fn status_code(&self) -> i32 {
        match self {
            SyncOutcome::Completed(_) => STATUS_SUCCESS,
            SyncOutcome::Failed(failure) => failure.status_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&SyncFailure> {
        match self {
            SyncOutcome::Completed(_) => None,
            SyncOutcome::Failed(failure) => Some(failure),
        }
    }
}

trait StageResultExt<T> {
    fn at_stage(self, stage: SyncStage) -> Result<T, SyncFailure>;
}

impl<T> StageResultExt<T> for SyncResult<T> {
    fn at_stage(self, stage: SyncStage) -> Result<T, SyncFailure> {
        self.map_err(|error| SyncFailure::new(stage, error))
    }
}

/// Runs syncs of one profile against a [`SyncStore`].
#[derive(Debug, Clone)]
pub struct SyncOrchestrator<S> {
    store: S,
    config: SyncConfig,
}

impl<S> SyncOrchestrator<S>
where
    S: SyncStore,
{
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Synchronizes the target table with `extract` and logs the outcome.
    pub async fn run(&self, extract: &Extract) -> SyncOutcome {
        let span = info_span!("sync_run", profile = %self.config.profile);

        async move {
            match self.try_run(extract).await {
                Ok(report) => {
                    info!(
                        rows = report.rows_loaded,
                        inserted = report.merge.inserted,
                        updated = report.merge.updated,
                        deleted = report.merge.deleted,
                        warnings = report.warnings,
                        "sync completed"
                    );
                    SyncOutcome::Completed(report)
                }
                Err(failure) => {
                    error!(
                        stage = %failure.stage,
                        status = failure.status_code(),
                        error = %failure.error,
                        "sync failed"
                    );
                    SyncOutcome::Failed(failure)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Synchronizes the target table with `extract`.
    ///
    /// Once the staging relation may exist, a failure still attempts to drop it before
    /// returning the original error.
    pub async fn try_run(&self, extract: &Extract) -> Result<SyncReport, SyncFailure> {
        let config = &self.config;
        info!(
            target_table = %config.target_table,
            rows = extract.len(),
            columns = extract.columns().len(),
            "starting sync"
        );
        if extract.dropped_rows() > 0 {
            warn!(rows = extract.dropped_rows(), "extract rows were dropped while reading");
        }

        let plan = self.reconcile(extract).await.at_stage(SyncStage::Reconcile)?;
        let mut warnings = plan.extract_only_columns.len() + plan.ignored_log_columns.len();

        warnings += self.provision(&plan, extract).await.at_stage(SyncStage::Provision)?;

        let staged = self.stage_and_merge(&plan, extract).await;
        let (rows_loaded, truncated_values, merge) = match staged {
            Ok(staged) => staged,
            Err(failure) => {
                self.drop_staging_after_failure().await;
                return Err(failure);
            }
        };

        self.store
            .drop_table(&config.staging_table)
            .await
            .at_stage(SyncStage::DropStaging)?;
        debug!(table = %config.staging_table, "dropped staging table");

        Ok(SyncReport {
            profile: config.profile.clone(),
            rows_received: extract.len(),
            rows_dropped: extract.dropped_rows(),
            rows_loaded,
            truncated_values,
            merge,
            warnings,
            extract_only_columns: plan.extract_only_columns,
        })
    }

    async fn reconcile(&self, extract: &Extract) -> SyncResult<ColumnPlan> {
        let config = &self.config;
        let target_columns = column_names(self.store.table_columns(&config.target_table).await?);
        let log_columns = column_names(self.store.table_columns(&config.log_table).await?);

        let plan = reconcile_columns(
            &extract.column_names(),
            &config.key_column,
            target_columns.as_deref(),
            log_columns.as_deref(),
        )
        .map_err(|err| err.with_context(format!("target table {}", config.target_table)))?;

        for column in &plan.extract_only_columns {
            warn!(
                table = %config.target_table,
                %column,
                "extract column is not in the target table and will not be merged"
            );
        }
        for column in &plan.ignored_log_columns {
            warn!(
                table = %config.log_table,
                %column,
                "log column is supplied by neither the extract nor the target table"
            );
        }
        if config.allow_delete && extract.is_empty() {
            warn!(
                table = %config.target_table,
                "extract is empty and deletes are allowed, every target row will be deleted"
            );
        }

        Ok(plan)
    }

    async fn provision(&self, plan: &ColumnPlan, extract: &Extract) -> SyncResult<usize> {
        let warnings = ensure_target_table(&self.store, &self.config, plan, extract).await?;
        ensure_log_table(&self.store, &self.config, plan).await?;

        Ok(warnings)
    }

    async fn stage_and_merge(
        &self,
        plan: &ColumnPlan,
        extract: &Extract,
    ) -> Result<(u64, usize, MergeStats), SyncFailure> {
        let config = &self.config;
        let staging = &config.staging_table;

        let target_columns = self
            .store
            .table_columns(&config.target_table)
            .await
            .and_then(|columns| {
                columns.ok_or_else(|| {
                    sync_error!(
                        ErrorKind::MissingTable,
                        "Target table does not exist after provisioning",
                        config.target_table
                    )
                })
            })
            .at_stage(SyncStage::CreateStaging)?;
        let columns = staging_columns(plan, &target_columns, config.default_column_length)
            .at_stage(SyncStage::CreateStaging)?;
        self.store
            .create_staging_table(staging, &config.target_table, &columns, &plan.key_column)
            .await
            .at_stage(SyncStage::CreateStaging)?;
        debug!(table = %staging, columns = columns.len(), "created staging table");

        let prepared = prepare_rows(
            extract,
            &columns,
            &LoadOptions {
                truncation: config.truncation.as_ref(),
                empty_as_null: config.empty_as_null,
            },
        );
        if prepared.truncated_values > 0 {
            info!(
                values = prepared.truncated_values,
                "truncated values to their column length"
            );
        }
        let truncated_values = prepared.truncated_values;
        let rows_loaded = self
            .store
            .load_staging(staging, &columns, prepared.rows)
            .await
            .map_err(|err| err.with_context(format!("staging table {staging}")))
            .at_stage(SyncStage::LoadStaging)?;
        info!(table = %staging, rows = rows_loaded, "loaded staging table");

        for column in street_number_columns(plan) {
            self.store
                .strip_characters(staging, column, STREET_NUMBER_STRIPPED_CHARACTERS)
                .await
                .at_stage(SyncStage::LoadStaging)?;
        }

        let merge = self
            .store
            .merge(&MergePlan::new(config, plan))
            .await
            .map_err(|err| err.with_context(format!("target table {}", config.target_table)))
            .at_stage(SyncStage::Merge)?;
        info!(table = %config.target_table, %merge, "merged staging into target");

        Ok((rows_loaded, truncated_values, merge))
    }

    async fn drop_staging_after_failure(&self) {
        let staging = &self.config.staging_table;
        if let Err(err) = self.store.drop_table(staging).await {
            warn!(
                table = %staging,
                error = %err,
                "failed to drop staging table after a failed run"
            );
        }
    }
}

fn column_names(columns: Option<Vec<postgres::schema::ColumnInfo>>) -> Option<Vec<String>> {
    columns.map(|columns| columns.into_iter().map(|column| column.name).collect())
}
