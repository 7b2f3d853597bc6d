//! Creation of the target and log tables on first use.

use std::fmt;

use postgres::schema::ColumnInfo;
use tracing::{info, warn};

use crate::error::{ErrorKind, SyncResult};
use crate::reconcile::ColumnPlan;
use crate::settings::SyncConfig;
use crate::store::SyncStore;
use crate::sync_error;
use crate::types::Extract;

/// Length of the key column of created target tables.
pub const KEY_COLUMN_LENGTH: u32 = 100;

/// Length of columns configured as long text.
pub const LONG_TEXT_COLUMN_LENGTH: u32 = 4000;

/// Column types used when a target table is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar(u32),
    Integer,
    DoublePrecision,
    Timestamp,
    Boolean,
}

impl ColumnType {
    /// Maps a source type name to a column type by substring, falling back to
    /// `varchar(default_length)`.
    pub fn from_source_type(source_type: Option<&str>, default_length: u32) -> ColumnType {
        let Some(source_type) = source_type else {
            return ColumnType::Varchar(default_length);
        };

        let source_type = source_type.to_ascii_lowercase();
        if source_type.contains("integer") {
            ColumnType::Integer
        } else if source_type.contains("double") || source_type.contains("decimal") {
            ColumnType::DoublePrecision
        } else if source_type.contains("datetime") {
            ColumnType::Timestamp
        } else if source_type.contains("bool") {
            ColumnType::Boolean
        } else {
            ColumnType::Varchar(default_length)
        }
    }

    /// Type as Postgres' `format_type` renders it.
    pub fn format_type(&self) -> String {
        match self {
            ColumnType::Varchar(length) => format!("character varying({length})"),
            ColumnType::Integer => "integer".to_string(),
            ColumnType::DoublePrecision => "double precision".to_string(),
            ColumnType::Timestamp => "timestamp without time zone".to_string(),
            ColumnType::Boolean => "boolean".to_string(),
        }
    }

    pub fn char_max_length(&self) -> Option<u32> {
        match self {
            ColumnType::Varchar(length) => Some(*length),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Varchar(length) => write!(f, "varchar({length})"),
            ColumnType::Integer => f.write_str("integer"),
            ColumnType::DoublePrecision => f.write_str("double precision"),
            ColumnType::Timestamp => f.write_str("timestamp"),
            ColumnType::Boolean => f.write_str("boolean"),
        }
    }
}

/// A column of a target table about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDefinition {
    /// Catalog view of the column once it exists.
    pub fn to_column_info(&self, nullable: bool) -> ColumnInfo {
        ColumnInfo::new(
            self.name.clone(),
            self.column_type.format_type(),
            self.column_type.char_max_length(),
            nullable,
        )
    }
}

/// Builds the columns of a new target table from the extract, in extract order.
///
/// The key is `varchar(100)`. Other columns take their type from the extract's source type
/// hints; untyped columns are `varchar(default_column_length)`, or `varchar(4000)` when listed
/// as long text.
pub fn target_column_definitions(
    extract: &Extract,
    plan: &ColumnPlan,
    config: &SyncConfig,
) -> Vec<ColumnDefinition> {
    extract
        .columns()
        .iter()
        .zip(&plan.staging_columns)
        .map(|(column, name)| {
            let column_type = if *name == plan.key_column {
                ColumnType::Varchar(KEY_COLUMN_LENGTH)
            } else {
                match ColumnType::from_source_type(
                    column.source_type.as_deref(),
                    config.default_column_length,
                ) {
                    ColumnType::Varchar(_) if config.long_text_columns.contains(name) => {
                        ColumnType::Varchar(LONG_TEXT_COLUMN_LENGTH)
                    }
                    column_type => column_type,
                }
            };

            ColumnDefinition {
                name: name.clone(),
                column_type,
            }
        })
        .collect()
}

/// Creates the target table when the plan found none.
///
/// An existing table is never altered; a nullable key column or a key without a unique index
/// only produces a warning. Returns the number of warnings raised.
pub async fn ensure_target_table<S>(
    store: &S,
    config: &SyncConfig,
    plan: &ColumnPlan,
    extract: &Extract,
) -> SyncResult<usize>
where
    S: SyncStore,
{
    let table = &config.target_table;

    if plan.target_exists {
        let columns = store.table_columns(table).await?.ok_or_else(|| {
            sync_error!(
                ErrorKind::MissingTable,
                "Target table disappeared during the run",
                table
            )
        })?;

        let mut warnings = 0;
        if columns
            .iter()
            .any(|column| column.name == plan.key_column && column.nullable)
        {
            warn!(
                table = %table,
                column = %plan.key_column,
                "key column should be `not null` with a unique index or primary key"
            );
            warnings += 1;
        }
        if !store.has_unique_index(table, &plan.key_column).await? {
            warn!(
                table = %table,
                column = %plan.key_column,
                "key column has no unique index or primary key"
            );
            warnings += 1;
        }

        return Ok(warnings);
    }

    let columns = target_column_definitions(extract, plan, config);
    store
        .create_target_table(table, &columns, &plan.key_column)
        .await
        .map_err(|err| err.with_context(format!("creating table {table}")))?;
    info!(table = %table, columns = columns.len(), "created target table");

    Ok(0)
}

/// Creates the log table with the plan's log columns when it does not exist yet.
pub async fn ensure_log_table<S>(
    store: &S,
    config: &SyncConfig,
    plan: &ColumnPlan,
) -> SyncResult<()>
where
    S: SyncStore,
{
    if plan.log_exists {
        return Ok(());
    }

    let log = &config.log_table;
    store
        .create_log_table(log, &config.target_table, &plan.key_column, &plan.log_columns)
        .await
        .map_err(|err| err.with_context(format!("creating log table {log}")))?;
    info!(table = %log, columns = plan.log_columns.len(), "created log table");

    Ok(())
}

#[cfg(test)]
mod tests {
    use config::shared::{ColumnNamingConfig, ExtractSourceConfig, SyncProfileConfig};

    use super::*;
    use crate::reconcile::reconcile_columns;
    use crate::types::ExtractColumn;

    fn config(long_text_columns: Vec<String>) -> SyncConfig {
        SyncConfig::from_profile(&SyncProfileConfig {
            name: "assets".to_string(),
            source: ExtractSourceConfig {
                path: "assets.csv".into(),
            },
            target_table: "assets".to_string(),
            log_table: "assets_log".to_string(),
            key_column: "id".to_string(),
            allow_delete: false,
            truncation_suffix: None,
            default_column_length: 500,
            empty_as_null: false,
            long_text_columns,
            column_types: Default::default(),
            naming: ColumnNamingConfig::default(),
        })
        .unwrap()
    }

    #[test]
    fn source_types_map_by_substring() {
        assert_eq!(ColumnType::from_source_type(Some("System.Integer"), 500), ColumnType::Integer);
        assert_eq!(
            ColumnType::from_source_type(Some("System.Decimal"), 500),
            ColumnType::DoublePrecision
        );
        assert_eq!(
            ColumnType::from_source_type(Some("Double"), 500),
            ColumnType::DoublePrecision
        );
        assert_eq!(
            ColumnType::from_source_type(Some("System.DateTime"), 500),
            ColumnType::Timestamp
        );
        assert_eq!(ColumnType::from_source_type(Some("System.Boolean"), 500), ColumnType::Boolean);
        assert_eq!(
            ColumnType::from_source_type(Some("System.String"), 500),
            ColumnType::Varchar(500)
        );
        assert_eq!(ColumnType::from_source_type(None, 250), ColumnType::Varchar(250));
    }

    #[test]
    fn definitions_follow_extract_order_and_hints() {
        let extract = Extract::new(
            vec![
                ExtractColumn::new("ID").with_source_type("System.Integer"),
                ExtractColumn::new("notes"),
                ExtractColumn::new("installed").with_source_type("System.DateTime"),
                ExtractColumn::new("name"),
            ],
            vec![],
        )
        .unwrap();
        let plan = reconcile_columns(&extract.column_names(), "id", None, None).unwrap();

        let config = config(vec!["notes".to_string()]);

        let definitions = target_column_definitions(&extract, &plan, &config);
        let rendered: Vec<String> = definitions
            .iter()
            .map(|definition| format!("{} {}", definition.name, definition.column_type))
            .collect();

        assert_eq!(
            rendered,
            vec![
                "ID varchar(100)",
                "notes varchar(4000)",
                "installed timestamp",
                "name varchar(500)"
            ]
        );
    }

    #[test]
    fn column_info_matches_catalog_rendering() {
        let definition = ColumnDefinition {
            name: "name".to_string(),
            column_type: ColumnType::Varchar(500),
        };
        let info = definition.to_column_info(true);

        assert_eq!(info.data_type, "character varying(500)");
        assert_eq!(info.char_max_length, Some(500));
        assert!(info.is_character_type());
    }
}
