//! Spreadsheet decoder backed by calamine.
//!
//! XLSX and XLSB sheets are read cell by cell, so only the header row and
//! the requested window are ever materialized, and the sheet's recorded
//! dimension is available without touching cell data. Legacy XLS and
//! OpenDocument sheets are loaded as a whole range and filtered.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{
    open_workbook, Cell, Data, DataRef, Dimensions, Ods, Range, Reader, Xls, Xlsb, Xlsx,
};
use chrono::Timelike;

use super::{Cells, DecodeSource, FilteredRows, RowFilter, SheetDecoder, SourceFormat};
use crate::error::ReadError;

pub struct WorkbookDecoder;

impl WorkbookDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WorkbookDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn workbook_error(e: impl std::fmt::Display) -> ReadError {
    ReadError::Workbook(e.to_string())
}

fn open<R>(path: &Path) -> Result<R, ReadError>
where
    R: Reader<BufReader<File>>,
    R::Error: std::fmt::Display,
{
    if !path.is_file() {
        return Err(ReadError::Open {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        });
    }
    open_workbook::<R, _>(path).map_err(workbook_error)
}

fn names<R>(path: &Path) -> Result<Vec<String>, ReadError>
where
    R: Reader<BufReader<File>>,
    R::Error: std::fmt::Display,
{
    let workbook: R = open(path)?;
    Ok(workbook.sheet_names())
}

fn load_range<R>(path: &Path, sheet: usize) -> Result<Range<Data>, ReadError>
where
    R: Reader<BufReader<File>>,
    R::Error: std::fmt::Display,
{
    let mut workbook: R = open(path)?;
    workbook
        .worksheet_range_at(sheet)
        .ok_or(ReadError::SheetNotFound(sheet))?
        .map_err(workbook_error)
}

fn range_for(source: &DecodeSource<'_>) -> Result<Range<Data>, ReadError> {
    match source.format {
        SourceFormat::Xls => load_range::<Xls<_>>(source.path, source.sheet),
        SourceFormat::Ods => load_range::<Ods<_>>(source.path, source.sheet),
        other => Err(ReadError::UnsupportedFormat(format!("{:?}", other))),
    }
}

/// Formats calamine can read cell by cell.
fn is_streamed(format: SourceFormat) -> bool {
    matches!(format, SourceFormat::Xlsx | SourceFormat::Xlsb)
}

/// A streamed cell: 1-based row, 0-based column and its text.
type StreamedCell = (u64, usize, Option<String>);

fn streamed_cell<E>(
    next: Result<Option<Cell<DataRef<'_>>>, E>,
) -> Result<Option<StreamedCell>, ReadError>
where
    E: std::fmt::Display,
{
    Ok(next.map_err(workbook_error)?.map(|cell| {
        let (row, column) = cell.get_position();
        (
            u64::from(row) + 1,
            column as usize,
            cell_text(&Data::from(cell.get_value().clone())),
        )
    }))
}

fn sheet_name(names: &[String], sheet: usize) -> Result<String, ReadError> {
    names.get(sheet).cloned().ok_or(ReadError::SheetNotFound(sheet))
}

/// Opens a cells reader on the selected sheet and hands `f` the sheet's
/// recorded dimensions and a function pulling the next cell.
fn with_cells<T>(
    source: &DecodeSource<'_>,
    f: impl FnOnce(
        Dimensions,
        &mut dyn FnMut() -> Result<Option<StreamedCell>, ReadError>,
    ) -> Result<T, ReadError>,
) -> Result<T, ReadError> {
    match source.format {
        SourceFormat::Xlsx => {
            let mut workbook: Xlsx<_> = open(source.path)?;
            let name = sheet_name(&workbook.sheet_names(), source.sheet)?;
            let mut cells = workbook
                .worksheet_cells_reader(&name)
                .map_err(workbook_error)?;
            f(cells.dimensions(), &mut || streamed_cell(cells.next_cell()))
        }
        SourceFormat::Xlsb => {
            let mut workbook: Xlsb<_> = open(source.path)?;
            let name = sheet_name(&workbook.sheet_names(), source.sheet)?;
            let mut cells = workbook
                .worksheet_cells_reader(&name)
                .map_err(workbook_error)?;
            f(cells.dimensions(), &mut || streamed_cell(cells.next_cell()))
        }
        other => Err(ReadError::UnsupportedFormat(format!("{:?}", other))),
    }
}

/// Renders a cell as text. Empty strings and empty cells are `None`.
pub(crate) fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if value.num_seconds_from_midnight() == 0 => {
                value.format("%Y-%m-%d").to_string()
            }
            Some(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Places a cell at its column, padding the gap with empty cells.
fn put(cells: &mut Cells, column: usize, value: Option<String>) {
    if value.is_none() {
        return;
    }
    if cells.len() <= column {
        cells.resize(column + 1, None);
    }
    cells[column] = value;
}

/// Streams cells in row order, keeping only what the filter selects.
fn streamed_filtered(
    source: &DecodeSource<'_>,
    filter: &RowFilter,
) -> Result<FilteredRows, ReadError> {
    with_cells(source, |_, next_cell| {
        let last_row = filter.last_row();
        let mut result = FilteredRows::default();
        let mut current: Option<(u64, Cells)> = None;

        while let Some((row, column, value)) = next_cell()? {
            if last_row.is_some_and(|last| row > last) {
                break;
            }
            if row != filter.header_row && !filter.wants(row) {
                continue;
            }

            if !matches!(current, Some((current_row, _)) if current_row == row) {
                if let Some(done) = current.take() {
                    collect(&mut result, filter, done);
                }
                current = Some((row, Cells::new()));
            }
            if let Some((_, cells)) = current.as_mut() {
                put(cells, column, value);
            }
        }
        if let Some(done) = current.take() {
            collect(&mut result, filter, done);
        }

        Ok(result)
    })
}

fn collect(result: &mut FilteredRows, filter: &RowFilter, (row, cells): (u64, Cells)) {
    if row == filter.header_row {
        result.header = cells;
    } else {
        result.rows.push((row, cells));
    }
}

/// Filters a fully loaded sheet range.
fn range_filtered(range: &Range<Data>, filter: &RowFilter) -> FilteredRows {
    let mut result = FilteredRows::default();
    let Some((start_row, start_col)) = range.start() else {
        return result;
    };
    let last_row = filter.last_row();

    for (i, row_cells) in range.rows().enumerate() {
        let row = u64::from(start_row) + i as u64 + 1;
        if last_row.is_some_and(|last| row > last) {
            break;
        }
        if row != filter.header_row && !filter.wants(row) {
            continue;
        }
        let mut cells = Cells::new();
        for (offset, cell) in row_cells.iter().enumerate() {
            put(&mut cells, start_col as usize + offset, cell_text(cell));
        }
        collect(&mut result, filter, (row, cells));
    }

    result
}

impl SheetDecoder for WorkbookDecoder {
    fn supports(&self, format: SourceFormat) -> bool {
        !format.is_delimited()
    }

    fn sheet_names(&self, source: &DecodeSource<'_>) -> Result<Vec<String>, ReadError> {
        match source.format {
            SourceFormat::Xlsx => names::<Xlsx<_>>(source.path),
            SourceFormat::Xls => names::<Xls<_>>(source.path),
            SourceFormat::Xlsb => names::<Xlsb<_>>(source.path),
            SourceFormat::Ods => names::<Ods<_>>(source.path),
            SourceFormat::Csv | SourceFormat::Tsv => Ok(Vec::new()),
        }
    }

    fn read_filtered(
        &self,
        source: &DecodeSource<'_>,
        filter: &RowFilter,
    ) -> Result<FilteredRows, ReadError> {
        if is_streamed(source.format) {
            return streamed_filtered(source, filter);
        }
        let range = range_for(source)?;
        Ok(range_filtered(&range, filter))
    }

    fn recorded_highest_row(&self, source: &DecodeSource<'_>) -> Result<Option<u64>, ReadError> {
        if !is_streamed(source.format) {
            return Ok(None);
        }
        with_cells(source, |dimensions, _| {
            // A missing dimension record reads as the single cell A1.
            if dimensions.end == (0, 0) {
                return Ok(None);
            }
            Ok(Some(u64::from(dimensions.end.0) + 1))
        })
    }

    fn scanned_highest_row(&self, source: &DecodeSource<'_>) -> Result<Option<u64>, ReadError> {
        if is_streamed(source.format) {
            return with_cells(source, |_, next_cell| {
                let mut highest = 0;
                while let Some((row, _, value)) = next_cell()? {
                    if value.is_some() {
                        highest = highest.max(row);
                    }
                }
                Ok(Some(highest))
            });
        }

        let range = range_for(source)?;
        Ok(Some(range.end().map_or(0, |(row, _)| u64::from(row) + 1)))
    }
}
