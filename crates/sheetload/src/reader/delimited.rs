//! Delimited text decoder (CSV, TSV and plain text).
//!
//! Records are streamed with the `csv` crate; rows outside the filter are
//! never kept, and decoding stops at the last row the filter needs.
//! Row numbers count records, so blank lines do not occupy a row.

use std::fs::File;

use csv::{ByteRecord, ReaderBuilder};

use super::{Cells, DecodeSource, FilteredRows, RowFilter, SheetDecoder, SourceFormat};
use crate::error::ReadError;

const BOM: &str = "\u{feff}";

pub struct DelimitedDecoder;

impl DelimitedDecoder {
    pub fn new() -> Self {
        Self
    }

    fn open(source: &DecodeSource<'_>) -> Result<csv::Reader<File>, ReadError> {
        let file = File::open(source.path).map_err(|e| ReadError::Open {
            path: source.path.to_path_buf(),
            source: e,
        })?;
        Ok(ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(source.delimiter)
            .from_reader(file))
    }
}

impl Default for DelimitedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn record_cells(record: &ByteRecord, first: bool) -> Cells {
    record
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let value = String::from_utf8_lossy(field);
            let value = if first && i == 0 {
                value.trim_start_matches(BOM)
            } else {
                value.as_ref()
            };
            (!value.is_empty()).then(|| value.to_string())
        })
        .collect()
}

impl SheetDecoder for DelimitedDecoder {
    fn supports(&self, format: SourceFormat) -> bool {
        format.is_delimited()
    }

    fn sheet_names(&self, _source: &DecodeSource<'_>) -> Result<Vec<String>, ReadError> {
        Ok(Vec::new())
    }

    fn read_filtered(
        &self,
        source: &DecodeSource<'_>,
        filter: &RowFilter,
    ) -> Result<FilteredRows, ReadError> {
        let mut reader = Self::open(source)?;
        let mut record = ByteRecord::new();
        let mut result = FilteredRows::default();
        let last_row = filter.last_row();
        let mut row: u64 = 0;

        while reader.read_byte_record(&mut record)? {
            row += 1;
            if row == filter.header_row {
                result.header = record_cells(&record, row == 1);
            } else if filter.wants(row) {
                result.rows.push((row, record_cells(&record, row == 1)));
            }
            if last_row.is_some_and(|last| row >= last) {
                break;
            }
        }

        Ok(result)
    }

    fn recorded_highest_row(&self, _source: &DecodeSource<'_>) -> Result<Option<u64>, ReadError> {
        Ok(None)
    }

    fn scanned_highest_row(&self, source: &DecodeSource<'_>) -> Result<Option<u64>, ReadError> {
        let mut reader = Self::open(source)?;
        let mut record = ByteRecord::new();
        let mut rows: u64 = 0;
        while reader.read_byte_record(&mut record)? {
            rows += 1;
        }
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{RowSelection, RowWindow};
    use std::path::Path;

    fn source(path: &Path, delimiter: u8) -> DecodeSource<'_> {
        DecodeSource {
            path,
            format: SourceFormat::Csv,
            sheet: 0,
            delimiter,
        }
    }

    #[test]
    fn test_header_only_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "\u{feff}name,email\nAnn,ann@x.io\n").unwrap();

        let rows = DelimitedDecoder::new()
            .read_filtered(&source(&path, b','), &RowFilter::new(0, RowSelection::None))
            .unwrap();
        assert_eq!(
            rows.header,
            vec![Some("name".to_string()), Some("email".to_string())]
        );
        assert!(rows.rows.is_empty());
    }

    #[test]
    fn test_window_selects_row_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut content = String::from("n\n");
        for i in 1..=30 {
            content.push_str(&format!("{}\n", i));
        }
        std::fs::write(&path, content).unwrap();

        let filter = RowFilter::new(0, RowSelection::Window(RowWindow::new(12, 16)));
        let rows = DelimitedDecoder::new()
            .read_filtered(&source(&path, b','), &filter)
            .unwrap();
        let numbers: Vec<u64> = rows.rows.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![12, 13, 14, 15, 16]);
        assert_eq!(rows.rows[0].1, vec![Some("11".to_string())]);
    }

    #[test]
    fn test_semicolon_delimiter_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a;b\n\"x;y\";\n").unwrap();

        let rows = DelimitedDecoder::new()
            .read_filtered(&source(&path, b';'), &RowFilter::new(0, RowSelection::All))
            .unwrap();
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.rows[0].1, vec![Some("x;y".to_string()), None]);
    }

    #[test]
    fn test_scanned_highest_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "h\n1\n2\n3\n").unwrap();

        let decoder = DelimitedDecoder::new();
        let src = source(&path, b',');
        assert_eq!(decoder.recorded_highest_row(&src).unwrap(), None);
        assert_eq!(decoder.scanned_highest_row(&src).unwrap(), Some(4));
    }

    #[test]
    fn test_missing_file() {
        let result = DelimitedDecoder::new().scanned_highest_row(&source(
            Path::new("/nonexistent/a.csv"),
            b',',
        ));
        assert!(matches!(result, Err(ReadError::Open { .. })));
    }
}
