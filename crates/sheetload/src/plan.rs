//! Chunk planning.
//!
//! Decides between streaming row windows and a single eager read, and
//! splits the data region into fixed-size chunks.

use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::estimate::{EstimateMethod, RowEstimate};
use crate::import::ImportOptions;
use crate::reader::{RawRow, RowSourceReader, RowWindow};
use crate::sanitize::redact_location;
use crate::storage::FileRef;

/// Above this many estimated rows a file is always streamed.
pub const STREAMING_ROW_THRESHOLD: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Streaming,
    WholeFile,
}

/// The work carried by one chunk: a window to read, or rows already read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPayload {
    Window(RowWindow),
    Rows(Vec<RawRow>),
}

impl ChunkPayload {
    pub fn describe(&self) -> String {
        match self {
            ChunkPayload::Window(w) => format!("rows {}-{}", w.start, w.end),
            ChunkPayload::Rows(rows) => format!("{} pre-read rows", rows.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub mode: ProcessingMode,
    pub payloads: Vec<ChunkPayload>,
    /// Problems the caller should be told about, e.g. a fallback to streaming.
    pub warnings: Vec<String>,
}

/// Rejects imports with more data rows than allowed.
pub fn check_max_rows(total_rows: u64, max_rows: Option<u64>) -> Result<(), PlanError> {
    match max_rows {
        Some(max) if total_rows > max => Err(PlanError::MaxRowsExceeded {
            max,
            actual: total_rows,
        }),
        _ => Ok(()),
    }
}

/// Chooses the processing mode.
///
/// An explicit choice wins. Otherwise more than a handful of rows, an
/// estimate that could not be derived from the file, an unknown size or a
/// size above `threshold` all mean streaming.
pub fn decide_mode(
    forced: Option<bool>,
    estimate: &RowEstimate,
    size: Option<u64>,
    threshold: u64,
) -> ProcessingMode {
    match forced {
        Some(true) => return ProcessingMode::Streaming,
        Some(false) => return ProcessingMode::WholeFile,
        None => {}
    }
    if estimate.method == EstimateMethod::Fallback || estimate.rows > STREAMING_ROW_THRESHOLD {
        return ProcessingMode::Streaming;
    }
    match size {
        Some(bytes) if bytes <= threshold => ProcessingMode::WholeFile,
        _ => ProcessingMode::Streaming,
    }
}

/// Contiguous windows covering `[header_offset + 2, header_offset + 1 + total_rows]`.
pub fn plan_windows(total_rows: u64, chunk_size: u64, header_offset: u64) -> Vec<RowWindow> {
    let chunk_size = chunk_size.max(1);
    let first = header_offset + 2;
    let last = header_offset + 1 + total_rows;

    let mut windows = Vec::with_capacity(total_rows.div_ceil(chunk_size) as usize);
    let mut start = first;
    while start <= last {
        let end = (start + chunk_size - 1).min(last);
        windows.push(RowWindow::new(start, end));
        start = end + 1;
    }
    windows
}

/// Splits rows into consecutive batches of at most `chunk_size`.
pub fn plan_batches(rows: Vec<RawRow>, chunk_size: u64) -> Vec<Vec<RawRow>> {
    let chunk_size = chunk_size.max(1) as usize;
    let mut batches = Vec::with_capacity(rows.len().div_ceil(chunk_size));
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        batches.push(rows.by_ref().take(chunk_size).collect());
    }
    batches
}

fn streaming_plan(total_rows: u64, chunk_size: u64, header_offset: u64) -> Vec<ChunkPayload> {
    plan_windows(total_rows, chunk_size, header_offset)
        .into_iter()
        .map(ChunkPayload::Window)
        .collect()
}

/// Builds the chunk payloads for an import.
///
/// In whole-file mode the data region is read once; if that read fails the
/// plan falls back to streaming and records a warning.
pub fn plan_chunks(
    reader: &RowSourceReader,
    file: &FileRef,
    total_rows: u64,
    chunk_size: u64,
    options: &ImportOptions,
    mode: ProcessingMode,
) -> ChunkPlan {
    let _span = tracing::info_span!(
        "plan_chunks",
        file = %redact_location(file),
        total_rows,
        chunk_size,
        mode = ?mode
    )
    .entered();

    if mode == ProcessingMode::WholeFile {
        match reader.read(file, options.active_sheet, options.header_offset, None) {
            Ok(rows) => {
                let payloads: Vec<ChunkPayload> = plan_batches(rows, chunk_size)
                    .into_iter()
                    .map(ChunkPayload::Rows)
                    .collect();
                log::info!("Planned {} whole-file chunks", payloads.len());
                return ChunkPlan {
                    mode,
                    payloads,
                    warnings: Vec::new(),
                };
            }
            Err(e) => {
                let warning = format!(
                    "Reading the whole file failed ({}); processing it in row windows instead",
                    e
                );
                log::warn!("{}", warning);
                return ChunkPlan {
                    mode: ProcessingMode::Streaming,
                    payloads: streaming_plan(total_rows, chunk_size, options.header_offset),
                    warnings: vec![warning],
                };
            }
        }
    }

    let payloads = streaming_plan(total_rows, chunk_size, options.header_offset);
    log::info!("Planned {} streaming chunks", payloads.len());
    ChunkPlan {
        mode,
        payloads,
        warnings: Vec::new(),
    }
}
