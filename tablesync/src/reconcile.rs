//! Column reconciliation between an extract and the existing target and log tables.

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Log columns written by the engine itself.
pub const LOG_ACTION_COLUMN: &str = "action";
pub const LOG_SYNCDATE_COLUMN: &str = "syncdate";

/// How every extract column takes part in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    /// Key column spelled as the target table spells it, or as the extract does when the target
    /// does not exist yet.
    pub key_column: String,
    /// Key column spelled as the log table spells it.
    pub log_key_column: String,
    /// Staging columns in extract order. Equal to the extract names except for the key, which
    /// uses [`ColumnPlan::key_column`].
    pub staging_columns: Vec<String>,
    /// Columns present in the target, in extract order, key included. These are merged.
    pub usable_columns: Vec<String>,
    /// Columns only the extract has. They are staged but never merged.
    pub extract_only_columns: Vec<String>,
    /// Non-key columns recorded in the log.
    pub log_columns: Vec<String>,
    /// Existing log columns that neither the extract nor the target supplies.
    pub ignored_log_columns: Vec<String>,
    pub target_exists: bool,
    pub log_exists: bool,
}

impl ColumnPlan {
    /// Usable columns other than the key; the columns an update compares and writes.
    pub fn merge_columns(&self) -> impl Iterator<Item = &str> {
        self.usable_columns
            .iter()
            .map(String::as_str)
            .filter(move |column| *column != self.key_column)
    }

    /// Returns `true` when the extract column at `index` is merged into the target.
    pub fn is_usable(&self, index: usize) -> bool {
        self.staging_columns
            .get(index)
            .is_some_and(|column| self.usable_columns.contains(column))
    }
}

/// Decides which extract columns are merged, which are only staged and which columns the log
/// records.
///
/// `target_columns` and `log_columns` are `None` when the table does not exist. The key is
/// matched case-insensitively and must be present in the extract, the target and the existing
/// log; every other name must match exactly.
pub fn reconcile_columns(
    extract_columns: &[&str],
    key_column: &str,
    target_columns: Option<&[String]>,
    log_columns: Option<&[String]>,
) -> SyncResult<ColumnPlan> {
    let Some(extract_key) = find_key(extract_columns.iter().copied(), key_column) else {
        bail!(
            ErrorKind::MissingKeyColumn,
            "Key column is not in the extract",
            format!("key column `{key_column}` is not one of the extract columns")
        );
    };

    let key = match target_columns {
        Some(target_columns) => {
            let Some(target_key) = find_key(target_columns.iter().map(String::as_str), key_column)
            else {
                bail!(
                    ErrorKind::MissingKeyColumn,
                    "Key column is not in the target table",
                    format!("key column `{key_column}` is not a column of the target table")
                );
            };
            target_key.to_string()
        }
        None => extract_key.to_string(),
    };

    let mut staging_columns = Vec::with_capacity(extract_columns.len());
    let mut usable_columns = Vec::new();
    let mut extract_only_columns = Vec::new();
    for column in extract_columns {
        if *column == extract_key {
            staging_columns.push(key.clone());
            usable_columns.push(key.clone());
            continue;
        }

        staging_columns.push(column.to_string());
        match target_columns {
            Some(target_columns) if !target_columns.iter().any(|target| target == column) => {
                extract_only_columns.push(column.to_string());
            }
            _ => usable_columns.push(column.to_string()),
        }
    }

    // Target columns the extract no longer supplies still hold values worth logging.
    let target_only_columns: Vec<&str> = target_columns
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .filter(|column| *column != key && !extract_columns.contains(column))
        .collect();
    let is_loggable = |column: &str| {
        column != key
            && (usable_columns.iter().any(|usable| usable == column)
                || target_only_columns.contains(&column))
    };

    let (log_key_column, log, ignored_log_columns) = match log_columns {
        Some(existing) => {
            let Some(log_key) = find_key(existing.iter().map(String::as_str), key_column) else {
                bail!(
                    ErrorKind::MissingKeyColumn,
                    "Key column is not in the log table",
                    format!("key column `{key_column}` is not a column of the log table")
                );
            };

            let mut log = Vec::new();
            let mut ignored = Vec::new();
            for column in existing {
                if column == log_key || is_log_metadata(column) {
                    continue;
                }
                if is_loggable(column.as_str()) {
                    log.push(column.clone());
                } else {
                    ignored.push(column.clone());
                }
            }

            (log_key.to_string(), log, ignored)
        }
        None => {
            let log = usable_columns
                .iter()
                .map(String::as_str)
                .chain(target_only_columns.iter().copied())
                .filter(|column| *column != key)
                .map(str::to_string)
                .collect();

            (key.clone(), log, Vec::new())
        }
    };

    Ok(ColumnPlan {
        key_column: key,
        log_key_column,
        staging_columns,
        usable_columns,
        extract_only_columns,
        log_columns: log,
        ignored_log_columns,
        target_exists: target_columns.is_some(),
        log_exists: log_columns.is_some(),
    })
}

/// Finds `key` among `columns`, preferring an exact match over a case-insensitive one.
fn find_key<'a>(columns: impl Iterator<Item = &'a str> + Clone, key: &str) -> Option<&'a str> {
    columns
        .clone()
        .find(|column| *column == key)
        .or_else(|| columns.into_iter().find(|column| column.eq_ignore_ascii_case(key)))
}

fn is_log_metadata(column: &str) -> bool {
    column.eq_ignore_ascii_case(LOG_ACTION_COLUMN)
        || column.eq_ignore_ascii_case(LOG_SYNCDATE_COLUMN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn everything_is_usable_without_a_target() {
        let plan = reconcile_columns(&["id", "name", "status"], "id", None, None).unwrap();

        assert_eq!(plan.usable_columns, names(&["id", "name", "status"]));
        assert!(plan.extract_only_columns.is_empty());
        assert_eq!(plan.log_columns, names(&["name", "status"]));
        assert_eq!(plan.log_key_column, "id");
        assert!(!plan.target_exists);
        assert!(!plan.log_exists);
    }

    #[test]
    fn extract_only_columns_are_staged_but_not_merged() {
        let target = names(&["id", "name"]);
        let plan =
            reconcile_columns(&["id", "name", "colour"], "id", Some(target.as_slice()), None)
                .unwrap();

        assert_eq!(plan.staging_columns, names(&["id", "name", "colour"]));
        assert_eq!(plan.usable_columns, names(&["id", "name"]));
        assert_eq!(plan.extract_only_columns, names(&["colour"]));
        assert_eq!(plan.merge_columns().collect::<Vec<_>>(), vec!["name"]);
        assert!(plan.is_usable(1));
        assert!(!plan.is_usable(2));
    }

    #[test]
    fn key_takes_the_target_spelling() {
        let target = names(&["AssetId", "name"]);
        let plan =
            reconcile_columns(&["assetid", "name"], "ASSETID", Some(target.as_slice()), None)
                .unwrap();

        assert_eq!(plan.key_column, "AssetId");
        assert_eq!(plan.staging_columns, names(&["AssetId", "name"]));
        assert_eq!(plan.usable_columns, names(&["AssetId", "name"]));
    }

    #[test]
    fn other_columns_match_exactly() {
        let target = names(&["id", "Name"]);
        let plan = reconcile_columns(&["id", "name"], "id", Some(target.as_slice()), None).unwrap();

        assert_eq!(plan.extract_only_columns, names(&["name"]));
        // The log mirrors the target when it has to be created.
        assert_eq!(plan.log_columns, names(&["Name"]));
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let err = reconcile_columns(&["name"], "id", None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKeyColumn);

        let target = names(&["name"]);
        let err =
            reconcile_columns(&["id", "name"], "id", Some(target.as_slice()), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKeyColumn);

        let target = names(&["id", "name"]);
        let log = names(&["action", "syncdate", "name"]);
        let err = reconcile_columns(
            &["id", "name"],
            "id",
            Some(target.as_slice()),
            Some(log.as_slice()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKeyColumn);
    }

    #[test]
    fn existing_log_columns_are_retained_or_ignored() {
        let target = names(&["id", "name", "status", "retired"]);
        let log = names(&["action", "ID", "syncdate", "name", "retired", "legacy"]);
        let plan = reconcile_columns(
            &["id", "name", "status"],
            "id",
            Some(target.as_slice()),
            Some(log.as_slice()),
        )
        .unwrap();

        assert_eq!(plan.log_key_column, "ID");
        // `status` is usable but the existing log has no such column.
        assert_eq!(plan.log_columns, names(&["name", "retired"]));
        assert_eq!(plan.ignored_log_columns, names(&["legacy"]));
    }

    #[test]
    fn exact_key_match_wins_over_case_insensitive_one() {
        let plan = reconcile_columns(&["ID", "id"], "id", None, None).unwrap();

        assert_eq!(plan.key_column, "id");
        assert_eq!(plan.log_columns, names(&["ID"]));
    }
}
