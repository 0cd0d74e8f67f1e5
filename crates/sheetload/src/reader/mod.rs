//! Row source reader.
//!
//! Decodes only the rows a caller asks for (plus the header row) from
//! delimited text or spreadsheet files, staging remote sources locally
//! for the duration of each read.

pub mod delimited;
pub mod workbook;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ReadError;
use crate::storage::{FileRef, StagedSource, Storage};

/// One decoded row keyed by header value. Empty cells are `None`.
pub type RawRow = BTreeMap<String, Option<String>>;

/// Cell values of one physical row, starting at column A.
pub type Cells = Vec<Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Tsv,
    Xlsx,
    Xls,
    Xlsb,
    Ods,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" | "txt" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "xlsx" | "xlsm" | "xltx" | "xltm" => Some(Self::Xlsx),
            "xls" | "xlt" | "xla" => Some(Self::Xls),
            "xlsb" => Some(Self::Xlsb),
            "ods" | "ots" => Some(Self::Ods),
            _ => None,
        }
    }

    pub fn is_delimited(&self) -> bool {
        matches!(self, Self::Csv | Self::Tsv)
    }
}

/// An inclusive, 1-based range of physical rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWindow {
    pub start: u64,
    pub end: u64,
}

impl RowWindow {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, row: u64) -> bool {
        row >= self.start && row <= self.end
    }

    pub fn len(&self) -> u64 {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which data rows a decoder should materialize besides the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSelection {
    /// Header row only.
    None,
    Window(RowWindow),
    /// Every row after the header.
    All,
}

/// Read filter handed to decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFilter {
    /// 1-based row number of the header row.
    pub header_row: u64,
    pub rows: RowSelection,
}

impl RowFilter {
    pub fn new(header_offset: u64, rows: RowSelection) -> Self {
        Self {
            header_row: header_offset + 1,
            rows,
        }
    }

    pub fn wants(&self, row: u64) -> bool {
        match self.rows {
            RowSelection::None => false,
            RowSelection::Window(window) => window.contains(row),
            RowSelection::All => row > self.header_row,
        }
    }

    /// The last row a decoder has to look at before it can stop.
    pub fn last_row(&self) -> Option<u64> {
        match self.rows {
            RowSelection::None => Some(self.header_row),
            RowSelection::Window(window) => Some(window.end.max(self.header_row)),
            RowSelection::All => None,
        }
    }
}

/// Rows returned by a decoder for a filter.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilteredRows {
    /// Cells of the header row, empty if the file is shorter.
    pub header: Cells,
    /// Selected data rows as `(row number, cells)`, in file order.
    pub rows: Vec<(u64, Cells)>,
}

/// A local file ready for decoding.
#[derive(Debug, Clone, Copy)]
pub struct DecodeSource<'a> {
    pub path: &'a Path,
    pub format: SourceFormat,
    pub sheet: usize,
    pub delimiter: u8,
}

/// Decodes one family of file formats.
pub trait SheetDecoder: Send + Sync {
    fn supports(&self, format: SourceFormat) -> bool;

    /// Sheet titles in workbook order. Formats without sheets return none.
    fn sheet_names(&self, source: &DecodeSource<'_>) -> Result<Vec<String>, ReadError>;

    fn read_filtered(
        &self,
        source: &DecodeSource<'_>,
        filter: &RowFilter,
    ) -> Result<FilteredRows, ReadError>;

    /// Highest populated row as recorded in the file's own summary data,
    /// if the format keeps one.
    fn recorded_highest_row(&self, source: &DecodeSource<'_>) -> Result<Option<u64>, ReadError>;

    /// Highest populated row found by reading the whole sheet.
    fn scanned_highest_row(&self, source: &DecodeSource<'_>) -> Result<Option<u64>, ReadError>;
}

pub struct DecoderRegistry {
    decoders: Vec<Box<dyn SheetDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            decoders: vec![
                Box::new(delimited::DelimitedDecoder::new()),
                Box::new(workbook::WorkbookDecoder::new()),
            ],
        }
    }

    pub fn resolve(&self, extension: &str) -> Result<(SourceFormat, &dyn SheetDecoder), ReadError> {
        let format = SourceFormat::from_extension(extension)
            .ok_or_else(|| ReadError::UnsupportedFormat(extension.to_string()))?;

        self.decoders
            .iter()
            .find(|d| d.supports(format))
            .map(|d| (format, d.as_ref()))
            .ok_or_else(|| ReadError::UnsupportedFormat(extension.to_string()))
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Which highest-row strategy to ask the decoder for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountStrategy {
    Recorded,
    Scanned,
}

/// Header values from column A up to the first empty cell.
pub fn derive_headers(cells: &[Option<String>]) -> Vec<String> {
    cells
        .iter()
        .map_while(|cell| {
            cell.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .collect()
}

/// Builds a header-keyed row, or `None` when every cell is empty.
/// Cells beyond the header width are dropped.
pub fn build_row(headers: &[String], cells: Cells) -> Option<RawRow> {
    let mut row = RawRow::new();
    let mut populated = false;
    for (header, cell) in headers.iter().zip(cells.into_iter().chain(std::iter::repeat(None))) {
        populated |= cell.is_some();
        row.insert(header.clone(), cell);
    }
    populated.then_some(row)
}

/// Reads rows from local or remote sources.
pub struct RowSourceReader {
    storage: Arc<Storage>,
    registry: DecoderRegistry,
    delimiter: u8,
}

impl RowSourceReader {
    pub fn new(storage: Arc<Storage>, delimiter: u8) -> Self {
        Self {
            storage,
            registry: DecoderRegistry::new(),
            delimiter,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Stages `file`, resolves its decoder by extension and runs `f`.
    /// Any temporary copy is gone once this returns.
    fn with_source<T>(
        &self,
        file: &FileRef,
        sheet: usize,
        f: impl FnOnce(&dyn SheetDecoder, &DecodeSource<'_>) -> Result<T, ReadError>,
    ) -> Result<T, ReadError> {
        let extension = file.extension();
        let (format, decoder) = self.registry.resolve(&extension)?;
        let staged = StagedSource::prepare(&self.storage, file)?;
        let delimiter = match format {
            SourceFormat::Tsv => b'\t',
            _ => self.delimiter,
        };
        let source = DecodeSource {
            path: staged.path(),
            format,
            sheet,
            delimiter,
        };
        f(decoder, &source)
    }

    /// Reads the rows in `window` (or every data row when `None`), keyed by
    /// the header row at `header_offset`. Rows whose cells are all empty are
    /// skipped. A window past the end of the file yields no rows.
    pub fn read(
        &self,
        file: &FileRef,
        sheet: usize,
        header_offset: u64,
        window: Option<RowWindow>,
    ) -> Result<Vec<RawRow>, ReadError> {
        let selection = window.map_or(RowSelection::All, RowSelection::Window);
        let filter = RowFilter::new(header_offset, selection);
        let filtered = self.with_source(file, sheet, |decoder, source| {
            decoder.read_filtered(source, &filter)
        })?;

        let headers = derive_headers(&filtered.header);
        if headers.is_empty() {
            return Ok(Vec::new());
        }

        Ok(filtered
            .rows
            .into_iter()
            .filter_map(|(_, cells)| build_row(&headers, cells))
            .collect())
    }

    /// Reads only the header row.
    pub fn headers(
        &self,
        file: &FileRef,
        sheet: usize,
        header_offset: u64,
    ) -> Result<Vec<String>, ReadError> {
        let filter = RowFilter::new(header_offset, RowSelection::None);
        let filtered = self.with_source(file, sheet, |decoder, source| {
            decoder.read_filtered(source, &filter)
        })?;
        Ok(derive_headers(&filtered.header))
    }

    pub fn sheet_names(&self, file: &FileRef) -> Result<Vec<String>, ReadError> {
        self.with_source(file, 0, |decoder, source| decoder.sheet_names(source))
    }

    pub fn highest_row(
        &self,
        file: &FileRef,
        sheet: usize,
        strategy: RowCountStrategy,
    ) -> Result<Option<u64>, ReadError> {
        self.with_source(file, sheet, |decoder, source| match strategy {
            RowCountStrategy::Recorded => decoder.recorded_highest_row(source),
            RowCountStrategy::Scanned => decoder.scanned_highest_row(source),
        })
    }
}
