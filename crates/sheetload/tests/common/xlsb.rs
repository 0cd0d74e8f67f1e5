//! Minimal XLSB writer for fixtures.
//!
//! Produces a single-sheet workbook holding inline string cells: a
//! relationships part, `xl/workbook.bin` and one worksheet part. Records use
//! the BIFF12 framing of a variable-length type followed by a
//! variable-length size.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const BRT_ROW_HDR: u16 = 0x0000;
const BRT_CELL_ST: u16 = 0x0006;
const BRT_BEGIN_SHEET_DATA: u16 = 0x0091;
const BRT_END_SHEET_DATA: u16 = 0x0092;
const BRT_WS_DIM: u16 = 0x0094;
const BRT_END_BUNDLE_SHS: u16 = 0x0090;
const BRT_BUNDLE_SH: u16 = 0x009C;
const BRT_CALC_PROP: u16 = 0x009D;

const RELATIONSHIPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.bin"/></Relationships>"#;

fn record(out: &mut Vec<u8>, typ: u16, payload: &[u8]) {
    if typ < 0x80 {
        out.push(typ as u8);
    } else {
        out.push((typ & 0x7F) as u8 | 0x80);
        out.push((typ >> 7) as u8);
    }
    let mut len = payload.len();
    loop {
        let mut byte = (len & 0x7F) as u8;
        len >>= 7;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out.extend_from_slice(payload);
}

fn wide(out: &mut Vec<u8>, text: &str) {
    let units: Vec<u16> = text.encode_utf16().collect();
    out.extend_from_slice(&(units.len() as u32).to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

fn workbook_part(sheet_name: &str) -> Vec<u8> {
    let mut bundle = Vec::new();
    bundle.extend_from_slice(&0u32.to_le_bytes()); // visible
    bundle.extend_from_slice(&1u32.to_le_bytes()); // tab id
    wide(&mut bundle, "rId1");
    wide(&mut bundle, sheet_name);

    let mut out = Vec::new();
    record(&mut out, BRT_BUNDLE_SH, &bundle);
    record(&mut out, BRT_END_BUNDLE_SHS, &[]);
    record(&mut out, BRT_CALC_PROP, &[]);
    out
}

fn sheet_part<R, S>(rows: &[R]) -> Vec<u8>
where
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    let last_row = rows.len().saturating_sub(1) as u32;
    let last_col = rows
        .iter()
        .map(|r| r.as_ref().len())
        .max()
        .unwrap_or(1)
        .saturating_sub(1) as u32;

    let mut dims = Vec::new();
    for value in [0, last_row, 0, last_col] {
        dims.extend_from_slice(&value.to_le_bytes());
    }

    let mut out = Vec::new();
    record(&mut out, BRT_WS_DIM, &dims);
    record(&mut out, BRT_BEGIN_SHEET_DATA, &[]);
    for (r, row) in rows.iter().enumerate() {
        record(&mut out, BRT_ROW_HDR, &(r as u32).to_le_bytes());
        for (c, value) in row.as_ref().iter().enumerate() {
            let value = value.as_ref();
            if value.is_empty() {
                continue;
            }
            let mut cell = Vec::new();
            cell.extend_from_slice(&(c as u32).to_le_bytes());
            cell.extend_from_slice(&0u32.to_le_bytes()); // style
            wide(&mut cell, value);
            record(&mut out, BRT_CELL_ST, &cell);
        }
    }
    record(&mut out, BRT_END_SHEET_DATA, &[]);
    out
}

/// Encodes a one-sheet XLSB workbook. The first row is the header.
pub fn xlsb_bytes<R, S>(sheet_name: &str, rows: &[R]) -> Vec<u8>
where
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let parts = [
        ("xl/_rels/workbook.bin.rels", RELATIONSHIPS.as_bytes().to_vec()),
        ("xl/workbook.bin", workbook_part(sheet_name)),
        ("xl/worksheets/sheet1.bin", sheet_part(rows)),
    ];
    for (name, content) in parts {
        zip.start_file(name, options).expect("Failed to start zip entry");
        zip.write_all(&content).expect("Failed to write zip entry");
    }
    zip.finish().expect("Failed to finish workbook").into_inner()
}
