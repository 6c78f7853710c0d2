// Excel/ODS import (calamine) and xlsx export (rust_xlsxwriter)

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader, Sheets};
use chrono::{Duration, NaiveDate};
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook, Worksheet};
use sheetwright_engine::{CellValue, Sheet, Workbook};

use crate::{sheet_from_grid, ExportError, ImportError};

/// Excel's maximum sheet-name length.
const MAX_SHEET_NAME: usize = 31;

/// Import a spreadsheet container (xlsx, xlsm, xlsb, xls, ods) from memory.
///
/// Sheets with no non-blank row are skipped; an empty result is left for
/// the caller to judge as an empty dataset.
pub fn import_bytes(bytes: &[u8]) -> Result<Workbook, ImportError> {
    let mut workbook: Sheets<_> = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Unreadable(e.to_string()))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(ImportError::NoSheets);
    }

    let mut sheets = Vec::with_capacity(sheet_names.len());
    for sheet_name in &sheet_names {
        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| ImportError::Unreadable(format!("sheet '{sheet_name}': {e}")))?;

        let grid: Vec<Vec<CellValue>> = range
            .rows()
            .map(|row| row.iter().map(cell_from_data).collect())
            .collect();

        match sheet_from_grid(sheet_name, grid) {
            Some(sheet) => sheets.push(sheet),
            None => log::debug!("skipping blank sheet '{sheet_name}'"),
        }
    }

    Workbook::from_sheets(sheets).map_err(|e| ImportError::Unreadable(e.to_string()))
}

fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        // Strings stay text: "00123" is an identifier, not 123
        Data::String(s) if s.trim().is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(n) => CellValue::Number(*n),
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Error(e) => CellValue::Text(format!("#{:?}", e)),
        Data::DateTime(dt) => match serial_to_date(dt.as_f64()) {
            Some(d) => CellValue::Date(d),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match sheetwright_engine::cell::parse_date(s) {
            Some(d) => CellValue::Date(d),
            None => CellValue::Text(s.clone()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

fn excel_epoch() -> Option<NaiveDate> {
    // 1900 date system, including Excel's phantom 1900-02-29
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

/// Excel serial (1900 system) to a calendar date. Sub-day serials are
/// times of day, not dates.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    excel_epoch()?.checked_add_signed(Duration::days(serial.floor() as i64))
}

pub fn date_to_serial(date: NaiveDate) -> Option<f64> {
    Some((date - excel_epoch()?).num_days() as f64)
}

// ============================================================================
// Export
// ============================================================================

/// Write the workbook as xlsx bytes. Header row bold, dates formatted
/// `yyyy-mm-dd`.
pub fn export_bytes(workbook: &Workbook) -> Result<Vec<u8>, ExportError> {
    let mut xlsx_workbook = XlsxWorkbook::new();
    let header_format = Format::new().set_bold();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");

    let mut used_names: Vec<String> = Vec::new();
    for sheet in workbook.sheets() {
        let name = xlsx_sheet_name(&sheet.name, &used_names);
        used_names.push(name.clone());

        let worksheet = xlsx_workbook
            .add_worksheet()
            .set_name(&name)
            .map_err(|e| ExportError(format!("Failed to create sheet '{}': {}", sheet.name, e)))?;

        export_sheet(sheet, worksheet, &header_format, &date_format)?;
    }

    xlsx_workbook
        .save_to_buffer()
        .map_err(|e| ExportError(format!("Failed to save XLSX: {}", e)))
}

fn export_sheet(
    sheet: &Sheet,
    worksheet: &mut Worksheet,
    header_format: &Format,
    date_format: &Format,
) -> Result<(), ExportError> {
    let cell_err = |row: u32, col: u16, e: rust_xlsxwriter::XlsxError| {
        ExportError(format!("sheet '{}' cell ({}, {}): {}", sheet.name, row, col, e))
    };

    for (col, header) in sheet.headers().iter().enumerate() {
        let col = col as u16;
        worksheet
            .write_string_with_format(0, col, header, header_format)
            .map_err(|e| cell_err(0, col, e))?;
    }

    for (r, row) in sheet.rows().iter().enumerate() {
        let row32 = r as u32 + 1;
        for (c, cell) in row.iter().enumerate() {
            let col16 = c as u16;
            let written = match cell {
                CellValue::Empty => continue,
                CellValue::Number(n) => worksheet.write_number(row32, col16, *n).map(|_| ()),
                CellValue::Text(s) => worksheet.write_string(row32, col16, s).map(|_| ()),
                CellValue::Bool(b) => worksheet.write_boolean(row32, col16, *b).map(|_| ()),
                CellValue::Date(d) => match date_to_serial(*d) {
                    Some(serial) => worksheet
                        .write_number_with_format(row32, col16, serial, date_format)
                        .map(|_| ()),
                    None => worksheet
                        .write_string(row32, col16, d.format("%Y-%m-%d").to_string())
                        .map(|_| ()),
                },
            };
            written.map_err(|e| cell_err(row32, col16, e))?;
        }
    }
    Ok(())
}

/// Excel sheet names: at most 31 chars, none of `[]:*?/\`, unique
/// case-insensitively.
fn xlsx_sheet_name(name: &str, used: &[String]) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\') { '_' } else { c })
        .take(MAX_SHEET_NAME)
        .collect();
    let cleaned = if cleaned.trim().is_empty() { "Sheet".to_string() } else { cleaned };

    let taken = |n: &str| used.iter().any(|u| u.eq_ignore_ascii_case(n));
    if !taken(&cleaned) {
        return cleaned;
    }
    for n in 2.. {
        let suffix = format!("_{n}");
        let stem: String = cleaned.chars().take(MAX_SHEET_NAME - suffix.len()).collect();
        let candidate = format!("{stem}{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
    }
    cleaned
}
