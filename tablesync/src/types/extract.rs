use std::collections::HashSet;

use postgres::schema::validate_identifier;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// A single value of an extract. `None` is loaded as `NULL`.
pub type Cell = Option<String>;

/// A positional row aligned to [`Extract::columns`].
pub type Row = Vec<Cell>;

/// A named extract column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractColumn {
    pub name: String,
    /// Type name reported by the source system, used as a hint when the target table is
    /// created.
    pub source_type: Option<String>,
}

impl ExtractColumn {
    pub fn new(name: impl Into<String>) -> ExtractColumn {
        ExtractColumn {
            name: name.into(),
            source_type: None,
        }
    }

    pub fn with_source_type(mut self, source_type: impl Into<String>) -> ExtractColumn {
        self.source_type = Some(source_type.into());
        self
    }
}

/// A freshly fetched batch of string typed rows.
///
/// The column list is non-empty, names are unique and usable as Postgres identifiers, and every
/// row has exactly one cell per column. An extract is immutable once built.
#[derive(Debug, Clone)]
pub struct Extract {
    columns: Vec<ExtractColumn>,
    rows: Vec<Row>,
    dropped_rows: usize,
}

impl Extract {
    pub fn new(columns: Vec<ExtractColumn>, rows: Vec<Row>) -> SyncResult<Extract> {
        if columns.is_empty() {
            bail!(ErrorKind::ExtractError, "Extract has no columns");
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if let Err(err) = validate_identifier(&column.name) {
                bail!(
                    ErrorKind::ExtractError,
                    "Extract column name cannot be used in Postgres",
                    err
                );
            }
            if !seen.insert(column.name.as_str()) {
                bail!(
                    ErrorKind::ExtractError,
                    "Extract column names are not unique",
                    format!("column `{}` appears more than once", column.name)
                );
            }
        }

        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            bail!(
                ErrorKind::ExtractError,
                "Extract row does not match the column list",
                format!(
                    "row {index} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )
            );
        }

        Ok(Extract {
            columns,
            rows,
            dropped_rows: 0,
        })
    }

    /// Records how many source rows were dropped before the extract was built.
    pub fn with_dropped_rows(mut self, dropped_rows: usize) -> Extract {
        self.dropped_rows = dropped_rows;
        self
    }

    pub fn columns(&self) -> &[ExtractColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
