use std::fmt;
use std::str::FromStr;

use pg_escape::quote_identifier;
use thiserror::Error;

/// Schema used when a table name is given without one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Longest identifier Postgres stores without silently truncating it.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Reasons an identifier is refused before it reaches any SQL statement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier cannot be empty")]
    Empty,
    #[error("identifier `{0}` is longer than 63 bytes")]
    TooLong(String),
    #[error("identifier `{0}` contains a NUL character")]
    ContainsNul(String),
}

/// Checks that `identifier` can be used as a Postgres identifier without being altered by the
/// server.
pub fn validate_identifier(identifier: &str) -> Result<(), IdentifierError> {
    if identifier.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(IdentifierError::TooLong(identifier.to_string()));
    }
    if identifier.contains('\0') {
        return Err(IdentifierError::ContainsNul(identifier.to_string()));
    }

    Ok(())
}

/// Validates and quotes a single identifier such as a column name.
pub fn quote_validated_identifier(identifier: &str) -> Result<String, IdentifierError> {
    validate_identifier(identifier)?;
    Ok(quote_identifier(identifier).into_owned())
}

/// Fully qualified table name with schema and table components.
///
/// Both components are validated on construction, so quoting never fails afterwards.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<TableName, IdentifierError> {
        let schema = schema.into();
        let name = name.into();
        validate_identifier(&schema)?;
        validate_identifier(&name)?;

        Ok(TableName { schema, name })
    }

    /// Returns a table in the same schema whose name is this table's name behind `prefix`.
    pub fn with_name_prefix(&self, prefix: &str) -> Result<TableName, IdentifierError> {
        TableName::new(self.schema.clone(), format!("{prefix}{}", self.name))
    }

    /// Returns the table name as a properly quoted Postgres identifier.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl FromStr for TableName {
    type Err = IdentifierError;

    /// Parses `schema.table` or `table`; a bare table lives in [`DEFAULT_SCHEMA`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('.') {
            Some((schema, name)) => TableName::new(schema, name),
            None => TableName::new(DEFAULT_SCHEMA, s),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column metadata read from the catalog.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// Type as rendered by `format_type`, e.g. `character varying(500)` or `integer`.
    pub data_type: String,
    /// Declared length of `varchar(n)`/`char(n)` columns.
    pub char_max_length: Option<u32>,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        char_max_length: Option<u32>,
        nullable: bool,
    ) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            data_type: data_type.into(),
            char_max_length,
            nullable,
        }
    }

    /// Returns `true` when values of this column are stored as character strings, in which case
    /// text parameters are assigned without an explicit cast.
    pub fn is_character_type(&self) -> bool {
        let data_type = self.data_type.to_ascii_lowercase();
        data_type == "text"
            || data_type.starts_with("character")
            || data_type.starts_with("varchar")
            || data_type.starts_with("char")
            || data_type.starts_with("bpchar")
    }
}
