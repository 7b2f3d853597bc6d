use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Largest length Postgres accepts for `varchar(n)`.
const MAX_VARCHAR_LENGTH: u32 = 10_485_760;

/// Schema of table names given without one.
pub const DEFAULT_TABLE_SCHEMA: &str = "public";

/// Prefix of the staging table created next to the target table.
pub const STAGING_TABLE_PREFIX: &str = "_staging_";

/// Settings of one extract "profile": where the extract comes from and which table it keeps
/// synchronized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncProfileConfig {
    /// Name used in logs and for selecting profiles.
    pub name: String,
    /// Extract file consumed by the `syncer` binary.
    pub source: ExtractSourceConfig,
    /// Target table as `schema.table` or `table` (which uses the `public` schema).
    pub target_table: String,
    /// Change-log table, same notation as [`SyncProfileConfig::target_table`].
    pub log_table: String,
    /// Column holding the unique row key.
    pub key_column: String,
    /// Deletes target rows whose key is missing from the extract.
    #[serde(default)]
    pub allow_delete: bool,
    /// Marker appended to truncated values. Truncation is disabled when unset.
    #[serde(default)]
    pub truncation_suffix: Option<String>,
    /// Length of `varchar` columns created without a more specific type, and the limit used
    /// for extract columns that the target table does not have.
    #[serde(default = "default_column_length")]
    pub default_column_length: u32,
    /// Loads blank values as `NULL`.
    #[serde(default)]
    pub empty_as_null: bool,
    /// Columns created as long text when the target table is provisioned. Entries are matched
    /// against column names after header normalization, not against the raw header labels.
    #[serde(default)]
    pub long_text_columns: Vec<String>,
    /// Source type names per column, used as type hints when the target table is created.
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,
    #[serde(default)]
    pub naming: ColumnNamingConfig,
}

/// Location of an extract file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractSourceConfig {
    pub path: PathBuf,
}

/// Rules turning extract header labels into column names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ColumnNamingConfig {
    /// Maps labels to internal field names through [`ColumnNamingConfig::internal_names`].
    #[serde(default)]
    pub use_internal_names: bool,
    /// Label to internal name metadata.
    #[serde(default)]
    pub internal_names: BTreeMap<String, String>,
    /// Replaces spaces in labels with [`ColumnNamingConfig::space_delimiter`].
    #[serde(default)]
    pub replace_spaces: bool,
    /// Replacement for spaces; spaces are removed when unset.
    #[serde(default)]
    pub space_delimiter: Option<String>,
    /// Substring substitutions applied to labels.
    #[serde(default)]
    pub replace_characters: BTreeMap<String, String>,
}

impl SyncProfileConfig {
    pub const DEFAULT_COLUMN_LENGTH: u32 = 500;

    /// Validates settings that can be checked without touching the database.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key_column.trim().is_empty() {
            return Err(ValidationError::EmptyKeyColumn(self.name.clone()));
        }

        let tables = [("target_table", &self.target_table), ("log_table", &self.log_table)];
        for (field, value) in tables {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyTableName {
                    profile: self.name.clone(),
                    field,
                });
            }
        }

        if self.qualified_target_table() == self.qualified_log_table() {
            return Err(ValidationError::LogTableIsTarget(self.name.clone()));
        }

        if self.default_column_length == 0 || self.default_column_length > MAX_VARCHAR_LENGTH {
            return Err(ValidationError::InvalidFieldValue {
                profile: self.name.clone(),
                field: "default_column_length",
                constraint: "must be between 1 and 10485760",
            });
        }

        if let Some(suffix) = &self.truncation_suffix
            && suffix.chars().count() as u32 >= self.default_column_length
        {
            return Err(ValidationError::InvalidFieldValue {
                profile: self.name.clone(),
                field: "truncation_suffix",
                constraint: "must be shorter than `default_column_length`",
            });
        }

        Ok(())
    }
}

impl SyncProfileConfig {
    /// Target table as `schema.table`, in the default schema when none is given.
    pub fn qualified_target_table(&self) -> String {
        qualify_table_name(&self.target_table)
    }

    pub fn qualified_log_table(&self) -> String {
        qualify_table_name(&self.log_table)
    }

    /// Staging table derived from the target table.
    pub fn qualified_staging_table(&self) -> String {
        let target = self.target_table.trim();
        let (schema, name) = target
            .split_once('.')
            .unwrap_or((DEFAULT_TABLE_SCHEMA, target));
        format!("{schema}.{STAGING_TABLE_PREFIX}{name}")
    }
}

fn qualify_table_name(table: &str) -> String {
    let table = table.trim();
    if table.contains('.') {
        table.to_string()
    } else {
        format!("{DEFAULT_TABLE_SCHEMA}.{table}")
    }
}

fn default_column_length() -> u32 {
    SyncProfileConfig::DEFAULT_COLUMN_LENGTH
}
