//! Streaming CSV reader producing an [`Extract`].
//!
//! The first record is the header. Quoted fields may span lines. A line break outside quotes
//! splits a record in two, so a record shorter than the header is carried over and its last
//! field is joined to the first field of the following record with `\r` until the header arity
//! is reached.

use std::collections::BTreeMap;
use std::io;

use config::shared::ColumnNamingConfig;
use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::naming::column_name_for_label;
use crate::types::{Extract, ExtractColumn, Row};

/// Separator restoring a line break that split a field outside quotes.
const CARRY_OVER_SEPARATOR: char = '\r';

const UTF8_BOM: char = '\u{feff}';

/// Reads a CSV extract from `reader`.
///
/// Header labels are turned into column names with `naming`. `column_types` maps column names
/// (or raw labels) to source type names used as type hints. Records that cannot be reassembled
/// to the header arity are dropped with a warning and counted in [`Extract::dropped_rows`].
pub fn read_csv_extract<R>(
    reader: R,
    naming: &ColumnNamingConfig,
    column_types: &BTreeMap<String, String>,
) -> SyncResult<Extract>
where
    R: io::Read,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = csv_reader.records();
    let Some(header) = records.next() else {
        bail!(ErrorKind::ExtractError, "Extract has no header record");
    };
    let header = header?;

    let columns: Vec<ExtractColumn> = header
        .iter()
        .enumerate()
        .map(|(index, label)| {
            let label = if index == 0 {
                label.trim_start_matches(UTF8_BOM)
            } else {
                label
            };
            let name = column_name_for_label(label, naming).into_owned();
            let source_type = column_types
                .get(&name)
                .or_else(|| column_types.get(label))
                .cloned();

            ExtractColumn { name, source_type }
        })
        .collect();
    let arity = columns.len();

    let mut rows: Vec<Row> = Vec::new();
    let mut dropped_rows = 0;
    let mut pending: Option<Vec<String>> = None;

    for record in records {
        let record = record?;
        let line = record.position().map(|position| position.line());
        let mut fields: Vec<String> = record.iter().map(str::to_owned).collect();

        if let Some(mut carried) = pending.take() {
            let mut rest = fields.into_iter();
            let head = rest.next().unwrap_or_default();
            if let Some(last) = carried.last_mut() {
                last.push(CARRY_OVER_SEPARATOR);
                last.push_str(&head);
            } else {
                carried.push(head);
            }
            carried.extend(rest);
            fields = carried;
        }

        match fields.len().cmp(&arity) {
            std::cmp::Ordering::Less => {
                debug!(?line, fields = fields.len(), arity, "carrying over a split record");
                pending = Some(fields);
            }
            std::cmp::Ordering::Equal => rows.push(fields.into_iter().map(Some).collect()),
            std::cmp::Ordering::Greater => {
                warn!(
                    ?line,
                    fields = fields.len(),
                    arity,
                    "dropping extract record with more fields than the header"
                );
                dropped_rows += 1;
            }
        }
    }

    if let Some(fields) = pending {
        warn!(
            fields = fields.len(),
            arity, "dropping incomplete extract record at end of input"
        );
        dropped_rows += 1;
    }

    Ok(Extract::new(columns, rows)?.with_dropped_rows(dropped_rows))
}
