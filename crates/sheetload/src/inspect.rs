//! Header and sheet inspection.
//!
//! Never fails: a source that cannot be read yields no headers and no
//! sheets, and callers fall back to entering column names by hand.

use crate::import::{ColumnMap, ImportColumn};
use crate::reader::RowSourceReader;
use crate::sanitize::redact_location;
use crate::storage::FileRef;

/// Header cells of the first sheet, from column A to the first empty cell.
pub fn headers(reader: &RowSourceReader, file: &FileRef, header_offset: u64) -> Vec<String> {
    headers_for_sheet(reader, file, 0, header_offset)
}

pub fn headers_for_sheet(
    reader: &RowSourceReader,
    file: &FileRef,
    sheet: usize,
    header_offset: u64,
) -> Vec<String> {
    match reader.headers(file, sheet, header_offset) {
        Ok(headers) => headers,
        Err(e) => {
            log::warn!(
                "Could not read headers from {}: {}",
                redact_location(file),
                e
            );
            Vec::new()
        }
    }
}

/// Sheet titles in workbook order. Delimited files have none.
pub fn sheet_names(reader: &RowSourceReader, file: &FileRef) -> Vec<String> {
    match reader.sheet_names(file) {
        Ok(names) => names,
        Err(e) => {
            log::warn!(
                "Could not read sheet names from {}: {}",
                redact_location(file),
                e
            );
            Vec::new()
        }
    }
}

/// Suggests a column map by matching detected headers against the
/// importer's columns. Columns without a matching header are left out.
pub fn suggest_column_map(headers: &[String], columns: &[ImportColumn]) -> ColumnMap {
    columns
        .iter()
        .filter_map(|column| {
            headers
                .iter()
                .find(|header| column.matches(header))
                .map(|header| (column.name.clone(), header.clone()))
        })
        .collect()
}
