//! Row count estimation.
//!
//! Tries the file's recorded dimension, then a scan, then a guess from
//! the byte size. Never fails; the last resort is a small fixed count.
//!
//! Only XLSX and XLSB carry a recorded dimension. Everything else is
//! scanned, which reads every record of a delimited file or every cell of
//! the sheet, so the scan costs one full pass over the source.

use serde::Serialize;

use crate::reader::{RowCountStrategy, RowSourceReader};
use crate::sanitize::redact_location;
use crate::storage::FileRef;

/// Count reported when nothing about the source can be determined.
pub const FALLBACK_ROWS: u64 = 10;

/// How an estimate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    /// The sheet's own summary of its highest populated row.
    Recorded,
    /// A full pass over the sheet's rows.
    Scanned,
    /// Banded guess from the byte size.
    SizeHeuristic,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowEstimate {
    /// Data rows, header excluded.
    pub rows: u64,
    pub method: EstimateMethod,
}

impl RowEstimate {
    /// Whether the estimate came from the file's contents.
    pub fn is_counted(&self) -> bool {
        matches!(self.method, EstimateMethod::Recorded | EstimateMethod::Scanned)
    }
}

/// Rough data-row count from a byte size.
pub fn size_heuristic(bytes: u64) -> u64 {
    match bytes {
        0..=1_023 => 1,
        1_024..=10_239 => 10,
        10_240..=102_399 => 100,
        _ => bytes / 1_000,
    }
}

/// Data rows below the header, given the highest populated row.
pub fn data_rows(highest_row: u64, header_offset: u64) -> u64 {
    highest_row.saturating_sub(header_offset + 1)
}

pub fn estimate_rows(
    reader: &RowSourceReader,
    file: &FileRef,
    sheet: usize,
    header_offset: u64,
) -> RowEstimate {
    let name = redact_location(file);
    let _span = tracing::debug_span!("estimate_rows", file = %name, sheet).entered();

    for (strategy, method) in [
        (RowCountStrategy::Recorded, EstimateMethod::Recorded),
        (RowCountStrategy::Scanned, EstimateMethod::Scanned),
    ] {
        match reader.highest_row(file, sheet, strategy) {
            Ok(Some(highest)) => {
                let rows = data_rows(highest, header_offset);
                log::debug!("Estimated {} rows in {} ({:?})", rows, name, method);
                return RowEstimate { rows, method };
            }
            Ok(None) => {}
            Err(e) => log::debug!("{:?} row count unavailable for {}: {}", method, name, e),
        }
    }

    match reader.storage().size(file) {
        Ok(bytes) => {
            let rows = size_heuristic(bytes);
            log::warn!(
                "Row count for {} estimated from its size ({} bytes): {} rows",
                name,
                bytes,
                rows
            );
            RowEstimate {
                rows,
                method: EstimateMethod::SizeHeuristic,
            }
        }
        Err(e) => {
            log::warn!("Could not size {}: {}; assuming {} rows", name, e, FALLBACK_ROWS);
            RowEstimate {
                rows: FALLBACK_ROWS,
                method: EstimateMethod::Fallback,
            }
        }
    }
}
