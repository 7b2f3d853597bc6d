use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveDateTime};
use postgres::schema::{ColumnInfo, TableName};
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::merge::{LogAction, MergePlan, MergeStats};
use crate::provision::ColumnDefinition;
use crate::reconcile::{LOG_ACTION_COLUMN, LOG_SYNCDATE_COLUMN};
use crate::sql::LOG_ACTION_LENGTH;
use crate::staging::StagingColumn;
use crate::store::base::SyncStore;
use crate::types::{Cell, Row};

const TIMESTAMP_TYPE: &str = "timestamp without time zone";
const TIMESTAMP_OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMP_INPUT_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Store operations a [`MemorySyncStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    CreateTargetTable,
    CreateLogTable,
    CreateStagingTable,
    LoadStaging,
    StripCharacters,
    Merge,
    DropTable,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<ColumnInfo>,
    primary_key: Option<usize>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn new(
        table: &TableName,
        mut columns: Vec<ColumnInfo>,
        primary_key: Option<&str>,
    ) -> SyncResult<Self> {
        let primary_key = match primary_key {
            Some(key) => {
                let Some(index) = columns.iter().position(|column| column.name == key) else {
                    bail!(
                        ErrorKind::SchemaError,
                        "Primary key column does not exist",
                        format!("column `{key}` of {table}")
                    );
                };
                columns[index].nullable = false;
                Some(index)
            }
            None => None,
        };

        Ok(MemoryTable {
            columns,
            primary_key,
            rows: Vec::new(),
        })
    }

    fn column_index(&self, table: &TableName, name: &str) -> SyncResult<usize> {
        match self.columns.iter().position(|column| column.name == name) {
            Some(index) => Ok(index),
            None => bail!(
                ErrorKind::SchemaError,
                "Column does not exist",
                format!("column `{name}` of {table}")
            ),
        }
    }

    fn empty_row(&self) -> Row {
        vec![None; self.columns.len()]
    }

    /// Coerces every value of `row` to its column type, as Postgres does on assignment.
    fn check_row(&self, row: Row) -> SyncResult<Row> {
        row.into_iter()
            .zip(&self.columns)
            .map(|(value, column)| coerce_value(column, value))
            .collect()
    }

    /// Appends `rows` after checking all of them, so either every row is added or none is.
    fn insert_all(&mut self, table: &TableName, rows: Vec<Row>) -> SyncResult<u64> {
        let mut checked = Vec::with_capacity(rows.len());
        for row in rows {
            checked.push(self.check_row(row)?);
        }

        if let Some(key) = self.primary_key {
            let mut keys: HashSet<&str> =
                self.rows.iter().filter_map(|row| row[key].as_deref()).collect();
            for row in &checked {
                if let Some(value) = row[key].as_deref()
                    && !keys.insert(value)
                {
                    bail!(
                        ErrorKind::ConstraintViolation,
                        "Duplicate key value violates unique constraint",
                        format!("key `{value}` appears more than once in {table}")
                    );
                }
            }
        }

        let inserted = checked.len() as u64;
        self.rows.extend(checked);

        Ok(inserted)
    }

    fn to_maps(&self) -> Vec<BTreeMap<String, Cell>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }
}

/// Converts `value` to the canonical text of `column`'s type, refusing what Postgres would
/// refuse.
fn coerce_value(column: &ColumnInfo, value: Cell) -> SyncResult<Cell> {
    let Some(value) = value else {
        if !column.nullable {
            bail!(
                ErrorKind::ConstraintViolation,
                "Null value violates not-null constraint",
                format!("column `{}`", column.name)
            );
        }
        return Ok(None);
    };

    if column.is_character_type() {
        if let Some(max_length) = column.char_max_length
            && value.chars().count() > max_length as usize
        {
            bail!(
                ErrorKind::ValueTooLong,
                "Value too long for column",
                format!(
                    "column `{}` allows {max_length} characters",
                    column.name
                )
            );
        }
        return Ok(Some(value));
    }

    let trimmed = value.trim();
    let coerced = match column.data_type.as_str() {
        "smallint" => trimmed.parse::<i16>().ok().map(|value| value.to_string()),
        "integer" => trimmed.parse::<i32>().ok().map(|value| value.to_string()),
        "bigint" => trimmed.parse::<i64>().ok().map(|value| value.to_string()),
        "double precision" | "real" | "numeric" => {
            trimmed.parse::<f64>().ok().map(|value| value.to_string())
        }
        "boolean" => parse_bool(trimmed).map(|value| value.to_string()),
        "date" => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .map(|date| date.to_string()),
        data_type if data_type.starts_with("timestamp") => parse_timestamp(trimmed)
            .map(|timestamp| timestamp.format(TIMESTAMP_OUTPUT_FORMAT).to_string()),
        _ => Some(value.clone()),
    };

    match coerced {
        Some(coerced) => Ok(Some(coerced)),
        None => bail!(
            ErrorKind::ConversionError,
            "Invalid input syntax for column type",
            format!(
                "value `{value}` is not a valid {} for column `{}`",
                column.data_type, column.name
            )
        ),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableName, MemoryTable>,
    failures: HashSet<StoreOperation>,
}

impl Inner {
    fn check_failure(&self, operation: StoreOperation) -> SyncResult<()> {
        if self.failures.contains(&operation) {
            bail!(
                ErrorKind::QueryFailed,
                "Injected store failure",
                format!("{operation:?} was configured to fail")
            );
        }

        Ok(())
    }

    fn table(&self, table: &TableName) -> SyncResult<&MemoryTable> {
        match self.tables.get(table) {
            Some(memory_table) => Ok(memory_table),
            None => bail!(
                ErrorKind::MissingTable,
                "Table does not exist",
                table.to_string()
            ),
        }
    }

    fn table_mut(&mut self, table: &TableName) -> SyncResult<&mut MemoryTable> {
        match self.tables.get_mut(table) {
            Some(memory_table) => Ok(memory_table),
            None => bail!(
                ErrorKind::MissingTable,
                "Table does not exist",
                table.to_string()
            ),
        }
    }
}

/// Builds log entries for rows of the target table.
struct LogWriter {
    width: usize,
    action: usize,
    key: (usize, usize),
    syncdate: usize,
    /// Pairs of target and log column positions.
    columns: Vec<(usize, usize)>,
    syncdate_value: String,
}

impl LogWriter {
    fn new(plan: &MergePlan, target: &MemoryTable, log: &MemoryTable) -> SyncResult<Self> {
        let columns = plan
            .log_columns
            .iter()
            .map(|column| {
                Ok((
                    target.column_index(&plan.target, column)?,
                    log.column_index(&plan.log, column)?,
                ))
            })
            .collect::<SyncResult<_>>()?;

        Ok(LogWriter {
            width: log.columns.len(),
            action: log.column_index(&plan.log, LOG_ACTION_COLUMN)?,
            key: (
                target.column_index(&plan.target, &plan.key_column)?,
                log.column_index(&plan.log, &plan.log_key_column)?,
            ),
            syncdate: log.column_index(&plan.log, LOG_SYNCDATE_COLUMN)?,
            columns,
            syncdate_value: Local::now()
                .naive_local()
                .format(TIMESTAMP_OUTPUT_FORMAT)
                .to_string(),
        })
    }

    fn entry(&self, action: LogAction, target_row: &Row) -> Row {
        let mut entry = vec![None; self.width];
        entry[self.action] = Some(action.to_string());
        entry[self.key.1] = target_row[self.key.0].clone();
        entry[self.syncdate] = Some(self.syncdate_value.clone());
        for (target_index, log_index) in &self.columns {
            entry[*log_index] = target_row[*target_index].clone();
        }

        entry
    }
}

/// In-memory [`SyncStore`] backing the engine tests.
///
/// Tables keep their column metadata and enforce what the engine relies on from Postgres:
/// declared character lengths, value types, not-null columns and primary keys. Loads and
/// merges work on copies that replace the stored tables only once every row succeeded, so a
/// failure leaves no partial effects.
#[derive(Debug, Clone, Default)]
pub struct MemorySyncStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces `table`, as an existing table found before a run.
    pub async fn create_table(
        &self,
        table: &TableName,
        columns: Vec<ColumnInfo>,
        primary_key: Option<&str>,
    ) -> SyncResult<()> {
        let memory_table = MemoryTable::new(table, columns, primary_key)?;
        let mut inner = self.inner.lock().await;
        inner.tables.insert(table.clone(), memory_table);

        Ok(())
    }

    /// Inserts one row given as column and value pairs. Missing columns are null.
    pub async fn insert_row(
        &self,
        table: &TableName,
        values: &[(&str, Option<&str>)],
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        let memory_table = inner.table_mut(table)?;

        let mut row = memory_table.empty_row();
        for (column, value) in values {
            let index = memory_table.column_index(table, column)?;
            row[index] = value.map(str::to_string);
        }
        memory_table.insert_all(table, vec![row])?;

        Ok(())
    }

    /// Returns the rows of `table` keyed by column name, in storage order.
    pub async fn table_rows(&self, table: &TableName) -> Vec<BTreeMap<String, Cell>> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .map(MemoryTable::to_maps)
            .unwrap_or_default()
    }

    pub async fn has_table(&self, table: &TableName) -> bool {
        let inner = self.inner.lock().await;
        inner.tables.contains_key(table)
    }

    /// Makes every later call of `operation` fail without effects.
    pub async fn inject_failure(&self, operation: StoreOperation) {
        let mut inner = self.inner.lock().await;
        inner.failures.insert(operation);
    }

    pub async fn clear_failures(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures.clear();
    }
}

impl SyncStore for MemorySyncStore {
    async fn table_columns(&self, table: &TableName) -> SyncResult<Option<Vec<ColumnInfo>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(table)
            .map(|memory_table| memory_table.columns.clone()))
    }

    async fn has_unique_index(&self, table: &TableName, column: &str) -> SyncResult<bool> {
        let inner = self.inner.lock().await;
        let memory_table = inner.table(table)?;

        Ok(memory_table
            .primary_key
            .is_some_and(|key| memory_table.columns[key].name == column))
    }

    async fn create_target_table(
        &self,
        table: &TableName,
        columns: &[ColumnDefinition],
        key_column: &str,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_failure(StoreOperation::CreateTargetTable)?;
        if inner.tables.contains_key(table) {
            return Ok(());
        }

        let columns = columns
            .iter()
            .map(|column| column.to_column_info(true))
            .collect();
        let memory_table = MemoryTable::new(table, columns, Some(key_column))?;
        inner.tables.insert(table.clone(), memory_table);
        info!(%table, "created in-memory target table");

        Ok(())
    }

    async fn create_log_table(
        &self,
        log: &TableName,
        target: &TableName,
        key_column: &str,
        log_columns: &[String],
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_failure(StoreOperation::CreateLogTable)?;
        if inner.tables.contains_key(log) {
            return Ok(());
        }

        let target_table = inner.table(target)?;
        let copy_column = |name: &str| -> SyncResult<ColumnInfo> {
            let index = target_table.column_index(target, name)?;
            Ok(ColumnInfo {
                nullable: true,
                ..target_table.columns[index].clone()
            })
        };

        let mut columns = vec![
            ColumnInfo::new(
                LOG_ACTION_COLUMN,
                format!("character varying({LOG_ACTION_LENGTH})"),
                Some(LOG_ACTION_LENGTH),
                true,
            ),
            copy_column(key_column)?,
            ColumnInfo::new(LOG_SYNCDATE_COLUMN, TIMESTAMP_TYPE, None, true),
        ];
        for column in log_columns {
            columns.push(copy_column(column)?);
        }

        let memory_table = MemoryTable::new(log, columns, None)?;
        inner.tables.insert(log.clone(), memory_table);

        Ok(())
    }

    async fn create_staging_table(
        &self,
        staging: &TableName,
        target: &TableName,
        columns: &[StagingColumn],
        key_column: &str,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_failure(StoreOperation::CreateStagingTable)?;
        inner.table(target)?;

        let columns = columns
            .iter()
            .map(|column| ColumnInfo {
                nullable: true,
                ..column.info.clone()
            })
            .collect();
        let memory_table = MemoryTable::new(staging, columns, Some(key_column))?;
        inner.tables.insert(staging.clone(), memory_table);

        Ok(())
    }

    async fn load_staging(
        &self,
        staging: &TableName,
        columns: &[StagingColumn],
        rows: Vec<Row>,
    ) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_failure(StoreOperation::LoadStaging)?;

        let mut loaded = inner.table(staging)?.clone();
        let positions = columns
            .iter()
            .map(|column| loaded.column_index(staging, &column.name))
            .collect::<SyncResult<Vec<_>>>()?;

        let rows = rows
            .into_iter()
            .map(|row| {
                let mut aligned = loaded.empty_row();
                for (value, position) in row.into_iter().zip(&positions) {
                    aligned[*position] = value;
                }
                aligned
            })
            .collect();
        let count = loaded.insert_all(staging, rows)?;
        inner.tables.insert(staging.clone(), loaded);

        Ok(count)
    }

    async fn strip_characters(
        &self,
        table: &TableName,
        column: &str,
        characters: &[char],
    ) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_failure(StoreOperation::StripCharacters)?;

        let memory_table = inner.table_mut(table)?;
        let index = memory_table.column_index(table, column)?;

        let mut scanned = 0;
        for row in &mut memory_table.rows {
            if let Some(value) = &mut row[index] {
                value.retain(|character| !characters.contains(&character));
                scanned += 1;
            }
        }

        Ok(scanned)
    }

    async fn merge(&self, plan: &MergePlan) -> SyncResult<MergeStats> {
        let mut inner = self.inner.lock().await;
        inner.check_failure(StoreOperation::Merge)?;

        let (target, log, stats) = {
            let staging = inner.table(&plan.staging)?;
            let mut target = inner.table(&plan.target)?.clone();
            let mut log = inner.table(&plan.log)?.clone();
            let writer = LogWriter::new(plan, &target, &log)?;

            let pairs = |columns: &[String]| -> SyncResult<Vec<(usize, usize)>> {
                columns
                    .iter()
                    .map(|column| {
                        Ok((
                            staging.column_index(&plan.staging, column)?,
                            target.column_index(&plan.target, column)?,
                        ))
                    })
                    .collect()
            };
            let insert_columns = pairs(&plan.insert_columns)?;
            let update_columns = pairs(&plan.update_columns)?;
            let staging_key = staging.column_index(&plan.staging, &plan.key_column)?;
            let target_key = writer.key.0;

            let staging_rows: HashMap<&str, &Row> = staging
                .rows
                .iter()
                .filter_map(|row| row[staging_key].as_deref().map(|key| (key, row)))
                .collect();

            let mut stats = MergeStats::default();
            let mut entries = Vec::new();

            let existing: HashSet<String> = target
                .rows
                .iter()
                .filter_map(|row| row[target_key].clone())
                .collect();
            let mut inserted = Vec::new();
            for row in &staging.rows {
                if row[staging_key]
                    .as_deref()
                    .is_some_and(|key| existing.contains(key))
                {
                    continue;
                }

                let mut new_row = target.empty_row();
                for (staging_index, target_index) in &insert_columns {
                    new_row[*target_index] = row[*staging_index].clone();
                }
                inserted.push(new_row);
            }
            stats.inserted = target.insert_all(&plan.target, inserted.clone())?;
            for row in &inserted {
                entries.push(writer.entry(LogAction::Insert, row));
            }

            let mut updated = Vec::new();
            for row in &mut target.rows {
                let Some(staged) = row[target_key]
                    .as_deref()
                    .and_then(|key| staging_rows.get(key))
                else {
                    continue;
                };

                let mut changed = row.clone();
                for (staging_index, target_index) in &update_columns {
                    changed[*target_index] = staged[*staging_index].clone();
                }
                if changed != *row {
                    updated.push(changed.clone());
                    *row = changed;
                }
            }
            for row in &updated {
                target.check_row(row.clone())?;
                entries.push(writer.entry(LogAction::Update, row));
            }
            stats.updated = updated.len() as u64;

            if plan.allow_delete {
                let (kept, deleted): (Vec<Row>, Vec<Row>) =
                    target.rows.drain(..).partition(|row| {
                        row[target_key]
                            .as_deref()
                            .is_some_and(|key| staging_rows.contains_key(key))
                    });
                target.rows = kept;
                for row in &deleted {
                    entries.push(writer.entry(LogAction::Delete, row));
                }
                stats.deleted = deleted.len() as u64;
            }

            log.insert_all(&plan.log, entries)?;

            (target, log, stats)
        };

        inner.tables.insert(plan.target.clone(), target);
        inner.tables.insert(plan.log.clone(), log);

        Ok(stats)
    }

    async fn drop_table(&self, table: &TableName) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_failure(StoreOperation::DropTable)?;
        inner.tables.remove(table);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableName {
        TableName::new("public", name).unwrap()
    }

    fn varchar(name: &str, length: u32) -> ColumnInfo {
        ColumnInfo::new(name, format!("character varying({length})"), Some(length), true)
    }

    #[tokio::test]
    async fn loads_enforce_lengths_and_keys_atomically() {
        let store = MemorySyncStore::new();
        let staging = table("_staging_assets");
        store
            .create_table(&staging, vec![varchar("id", 10), varchar("name", 3)], Some("id"))
            .await
            .unwrap();
        let columns = vec![
            StagingColumn {
                name: "id".to_string(),
                info: varchar("id", 10),
                from_target: true,
            },
            StagingColumn {
                name: "name".to_string(),
                info: varchar("name", 3),
                from_target: true,
            },
        ];

        let err = store
            .load_staging(
                &staging,
                &columns,
                vec![
                    vec![Some("1".into()), Some("abc".into())],
                    vec![Some("2".into()), Some("abcd".into())],
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueTooLong);
        assert!(store.table_rows(&staging).await.is_empty());

        let err = store
            .load_staging(
                &staging,
                &columns,
                vec![vec![Some("1".into()), None], vec![Some("1".into()), None]],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        let err = store
            .load_staging(&staging, &columns, vec![vec![None, None]])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert!(store.table_rows(&staging).await.is_empty());
    }

    #[test]
    fn typed_values_are_canonicalized() {
        let integer = ColumnInfo::new("n", "integer", None, true);
        assert_eq!(coerce_value(&integer, Some(" 042 ".into())).unwrap(), Some("42".into()));
        assert_eq!(
            coerce_value(&integer, Some("x".into())).unwrap_err().kind(),
            ErrorKind::ConversionError
        );

        let flag = ColumnInfo::new("f", "boolean", None, true);
        assert_eq!(coerce_value(&flag, Some("YES".into())).unwrap(), Some("true".into()));

        let installed = ColumnInfo::new("t", TIMESTAMP_TYPE, None, true);
        assert_eq!(
            coerce_value(&installed, Some("2024-03-01T10:15:00".into())).unwrap(),
            Some("2024-03-01 10:15:00".into())
        );
        assert_eq!(
            coerce_value(&installed, Some("2024-03-01".into())).unwrap(),
            Some("2024-03-01 00:00:00".into())
        );
    }

    #[tokio::test]
    async fn strip_characters_counts_non_null_values() {
        let store = MemorySyncStore::new();
        let staging = table("_staging_assets");
        store
            .create_table(&staging, vec![varchar("id", 10), varchar("number", 10)], Some("id"))
            .await
            .unwrap();
        store
            .insert_row(&staging, &[("id", Some("1")), ("number", Some("=\"12\""))])
            .await
            .unwrap();
        store.insert_row(&staging, &[("id", Some("2"))]).await.unwrap();

        let scanned = store
            .strip_characters(&staging, "number", &['=', '"'])
            .await
            .unwrap();

        assert_eq!(scanned, 1);
        let rows = store.table_rows(&staging).await;
        assert_eq!(rows[0]["number"], Some("12".to_string()));
        assert_eq!(rows[1]["number"], None);
    }

    #[tokio::test]
    async fn injected_failures_have_no_effect() {
        let store = MemorySyncStore::new();
        let target = table("assets");
        store.inject_failure(StoreOperation::CreateTargetTable).await;

        let err = store
            .create_target_table(
                &target,
                &[ColumnDefinition {
                    name: "id".to_string(),
                    column_type: crate::provision::ColumnType::Varchar(100),
                }],
                "id",
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert!(!store.has_table(&target).await);
    }
}
