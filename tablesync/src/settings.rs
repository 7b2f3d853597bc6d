//! Resolved settings of one sync run.

use config::shared::SyncProfileConfig;
use postgres::schema::{TableName, validate_identifier};

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;

/// Prefix of the staging relation created next to the target table.
pub const STAGING_TABLE_PREFIX: &str = config::shared::STAGING_TABLE_PREFIX;

/// Settings an orchestrator runs with, resolved and validated from a [`SyncProfileConfig`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Name used in logs.
    pub profile: String,
    pub target_table: TableName,
    pub log_table: TableName,
    /// `<schema>._staging_<target name>`.
    pub staging_table: TableName,
    pub key_column: String,
    pub allow_delete: bool,
    pub truncation: Option<TruncationConfig>,
    pub default_column_length: u32,
    pub empty_as_null: bool,
    pub long_text_columns: Vec<String>,
}

/// Marker appended to values cut to their column's maximum length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationConfig {
    pub suffix: String,
}

impl SyncConfig {
    pub fn from_profile(profile: &SyncProfileConfig) -> SyncResult<SyncConfig> {
        profile.validate().map_err(|err| {
            sync_error!(
                ErrorKind::ConfigError,
                "Sync profile is invalid",
                format!("profile `{}`: {err}", profile.name)
            )
        })?;

        let target_table: TableName = profile
            .target_table
            .parse()
            .map_err(|err| invalid_table("target_table", &profile.name, err))?;
        let log_table: TableName = profile
            .log_table
            .parse()
            .map_err(|err| invalid_table("log_table", &profile.name, err))?;
        let staging_table = target_table
            .with_name_prefix(STAGING_TABLE_PREFIX)
            .map_err(|err| invalid_table("target_table", &profile.name, err))?;

        if log_table == target_table {
            return Err(sync_error!(
                ErrorKind::ConfigError,
                "Log table cannot be the target table",
                format!("profile `{}` uses `{target_table}` for both", profile.name)
            ));
        }

        let key_column = profile.key_column.trim().to_string();
        validate_identifier(&key_column)?;

        Ok(SyncConfig {
            profile: profile.name.clone(),
            target_table,
            log_table,
            staging_table,
            key_column,
            allow_delete: profile.allow_delete,
            truncation: profile
                .truncation_suffix
                .clone()
                .map(|suffix| TruncationConfig { suffix }),
            default_column_length: profile.default_column_length,
            empty_as_null: profile.empty_as_null,
            long_text_columns: profile.long_text_columns.clone(),
        })
    }
}

fn invalid_table(
    field: &str,
    profile: &str,
    err: postgres::schema::IdentifierError,
) -> crate::error::SyncError {
    sync_error!(
        ErrorKind::InvalidIdentifier,
        "Table name cannot be used in Postgres",
        format!("profile `{profile}`, `{field}`: {err}")
    )
}
