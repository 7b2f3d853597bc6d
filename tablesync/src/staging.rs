//! Shaping and preparing the rows loaded into the staging relation.

use std::borrow::Cow;

use postgres::schema::ColumnInfo;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::reconcile::ColumnPlan;
use crate::settings::TruncationConfig;
use crate::types::{Extract, Row};

/// Characters stripped from staged street number values.
pub const STREET_NUMBER_STRIPPED_CHARACTERS: &[char] = &['=', '"'];

/// Words that together mark a street number column.
const STREET_NUMBER_WORDS: [&str; 3] = ["asset", "street", "number"];

/// A column of the staging relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingColumn {
    pub name: String,
    /// Type copied from the target, or `varchar(default_column_length)` for extract-only columns.
    pub info: ColumnInfo,
    /// Whether the column exists in the target table.
    pub from_target: bool,
}

/// Builds the staging columns in extract order.
///
/// Usable columns copy the target's column, extract-only columns are generic `varchar`.
pub fn staging_columns(
    plan: &ColumnPlan,
    target_columns: &[ColumnInfo],
    default_column_length: u32,
) -> SyncResult<Vec<StagingColumn>> {
    let mut columns = Vec::with_capacity(plan.staging_columns.len());
    for (index, name) in plan.staging_columns.iter().enumerate() {
        if plan.is_usable(index) {
            let Some(info) = target_columns.iter().find(|column| column.name == *name) else {
                bail!(
                    ErrorKind::SchemaError,
                    "Target table is missing a reconciled column",
                    format!("column `{name}` is not in the target table")
                );
            };
            columns.push(StagingColumn {
                name: name.clone(),
                info: info.clone(),
                from_target: true,
            });
        } else {
            columns.push(StagingColumn {
                name: name.clone(),
                info: ColumnInfo::new(
                    name.clone(),
                    format!("character varying({default_column_length})"),
                    Some(default_column_length),
                    true,
                ),
                from_target: false,
            });
        }
    }

    Ok(columns)
}

/// Cuts `value` to `max_length` characters, ending with `suffix`, when it is longer.
///
/// The result has exactly `max_length` characters. A suffix that does not fit is itself cut.
pub fn truncate_value<'a>(value: &'a str, max_length: usize, suffix: &str) -> Cow<'a, str> {
    if max_length == 0 || value.chars().count() <= max_length {
        return Cow::Borrowed(value);
    }

    let suffix_length = suffix.chars().count();
    if suffix_length >= max_length {
        return Cow::Owned(suffix.chars().take(max_length).collect());
    }

    let mut truncated: String = value.chars().take(max_length - suffix_length).collect();
    truncated.push_str(suffix);
    Cow::Owned(truncated)
}

/// Options applied to values before they are staged.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions<'a> {
    pub truncation: Option<&'a TruncationConfig>,
    pub empty_as_null: bool,
}

/// Rows ready for the staging relation.
#[derive(Debug)]
pub struct PreparedRows {
    pub rows: Vec<Row>,
    /// Number of values cut to their column's maximum length.
    pub truncated_values: usize,
}

/// Applies truncation and blank handling to every row of `extract`.
///
/// Only character columns with a declared maximum length are truncated. Blank values of
/// non-character columns are always loaded as null since they cannot be cast from text.
pub fn prepare_rows(
    extract: &Extract,
    columns: &[StagingColumn],
    options: &LoadOptions<'_>,
) -> PreparedRows {
    let typed: Vec<bool> = columns
        .iter()
        .map(|column| !column.info.is_character_type())
        .collect();
    let limits: Vec<Option<usize>> = columns
        .iter()
        .map(|column| match options.truncation {
            Some(_) if column.info.is_character_type() => {
                column.info.char_max_length.map(|length| length as usize)
            }
            _ => None,
        })
        .collect();
    let suffix = options
        .truncation
        .map(|truncation| truncation.suffix.as_str())
        .unwrap_or_default();

    let mut truncated_values = 0;
    let rows = extract
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .zip(limits.iter().zip(&typed))
                .map(|(cell, (limit, typed))| {
                    let value = cell.as_deref()?;
                    if (*typed || options.empty_as_null) && value.trim().is_empty() {
                        return None;
                    }

                    match limit {
                        Some(limit) => match truncate_value(value, *limit, suffix) {
                            Cow::Owned(truncated) => {
                                truncated_values += 1;
                                Some(truncated)
                            }
                            Cow::Borrowed(value) => Some(value.to_string()),
                        },
                        None => Some(value.to_string()),
                    }
                })
                .collect()
        })
        .collect();

    PreparedRows {
        rows,
        truncated_values,
    }
}

/// Usable columns whose lower-cased name contains `asset`, `street` and `number`.
pub fn street_number_columns(plan: &ColumnPlan) -> Vec<&str> {
    plan.usable_columns
        .iter()
        .filter(|column| {
            let column = column.to_lowercase();
            STREET_NUMBER_WORDS.iter().all(|word| column.contains(word))
        })
        .map(String::as_str)
        .collect()
}
