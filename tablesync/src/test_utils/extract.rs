use crate::types::{Extract, ExtractColumn};

/// Builds an extract from column names and rows of optional string values.
///
/// # Panics
///
/// Panics if the columns and rows do not form a valid extract.
pub fn build_extract(columns: &[&str], rows: &[&[Option<&str>]]) -> Extract {
    Extract::new(
        columns.iter().map(|column| ExtractColumn::new(*column)).collect(),
        rows.iter()
            .map(|row| row.iter().map(|value| value.map(str::to_string)).collect())
            .collect(),
    )
    .expect("Failed to build extract")
}
