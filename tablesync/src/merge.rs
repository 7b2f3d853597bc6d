//! Diffing the staging relation against the target table.
//!
//! A merge runs three steps in one transaction:
//!
//! 1. staging keys missing from the target are inserted and logged as `insert`,
//! 2. rows whose usable non-key columns differ (null-aware) are overwritten and logged as
//!    `update` with their new values,
//! 3. when deletes are allowed, target keys missing from staging are deleted and logged as
//!    `delete` with their last values.
//!
//! Unchanged rows are neither written nor logged, so merging the same extract twice is a no-op.

use std::fmt;

use postgres::schema::TableName;

use crate::reconcile::ColumnPlan;
use crate::settings::SyncConfig;

/// Action recorded in the log table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogAction {
    Insert,
    Update,
    Delete,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Insert => "insert",
            LogAction::Update => "update",
            LogAction::Delete => "delete",
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a store needs to merge staging into the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub target: TableName,
    pub staging: TableName,
    pub log: TableName,
    pub key_column: String,
    pub log_key_column: String,
    /// Usable columns other than the key, compared and written by updates.
    pub update_columns: Vec<String>,
    /// Usable columns including the key, written by inserts.
    pub insert_columns: Vec<String>,
    /// Target columns recorded in the log next to the action, key and sync date.
    pub log_columns: Vec<String>,
    pub allow_delete: bool,
}

impl MergePlan {
    pub fn new(config: &SyncConfig, plan: &ColumnPlan) -> MergePlan {
        MergePlan {
            target: config.target_table.clone(),
            staging: config.staging_table.clone(),
            log: config.log_table.clone(),
            key_column: plan.key_column.clone(),
            log_key_column: plan.log_key_column.clone(),
            update_columns: plan.merge_columns().map(str::to_string).collect(),
            insert_columns: plan.usable_columns.clone(),
            log_columns: plan.log_columns.clone(),
            allow_delete: config.allow_delete,
        }
    }

    /// Without non-key columns there is nothing an update could change.
    pub fn can_update(&self) -> bool {
        !self.update_columns.is_empty()
    }
}

/// Number of rows each merge step affected. Every affected row has exactly one log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl MergeStats {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} deleted",
            self.inserted, self.updated, self.deleted
        )
    }
}
