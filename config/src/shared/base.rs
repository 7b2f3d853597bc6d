use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A profile does not name its key column.
    #[error("profile `{0}`: `key_column` cannot be empty")]
    EmptyKeyColumn(String),
    /// A profile names an empty target or log table.
    #[error("profile `{profile}`: `{field}` cannot be empty")]
    EmptyTableName { profile: String, field: &'static str },
    /// The target and the log table of a profile are the same relation.
    #[error("profile `{0}`: `target_table` and `log_table` must differ")]
    LogTableIsTarget(String),
    /// Two profiles write to the same target table.
    #[error("profiles `{first}` and `{second}` both target `{table}`")]
    DuplicateTargetTable {
        first: String,
        second: String,
        table: String,
    },
    /// A table of one profile is used in another role by a second profile.
    #[error("profiles `{first}` and `{second}` both use `{table}`")]
    SharedTable {
        first: String,
        second: String,
        table: String,
    },
    /// Two profiles share the same name.
    #[error("profile name `{0}` is used more than once")]
    DuplicateProfileName(String),
    /// A numeric setting is outside its accepted range.
    #[error("profile `{profile}`: `{field}` {constraint}")]
    InvalidFieldValue {
        profile: String,
        field: &'static str,
        constraint: &'static str,
    },
}
