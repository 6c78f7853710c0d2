// Workbook import/export
//
// Import takes raw bytes (the upload) rather than a path: the format is
// sniffed from magic bytes, not a file extension.

pub mod csv;
pub mod xlsx;

use std::fmt;

use sheetwright_engine::{CellValue, Sheet, Workbook};

/// Container formats we can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Zip container: xlsx, xlsm, xlsb or ods.
    Zip,
    /// OLE compound document: legacy xls.
    Ole,
    /// Delimited text.
    Delimited,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Sniff the container format. `None` means the bytes are not a workbook
/// we understand (empty, or binary that is neither zip nor OLE).
pub fn detect_format(bytes: &[u8]) -> Option<Format> {
    if bytes.starts_with(ZIP_MAGIC) {
        return Some(Format::Zip);
    }
    if bytes.starts_with(OLE_MAGIC) {
        return Some(Format::Ole);
    }
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    // NUL in the head is a strong sign of binary content
    if bytes.iter().take(4096).any(|&b| b == 0) {
        return None;
    }
    Some(Format::Delimited)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportError {
    /// Bytes could not be parsed as any supported format.
    Unreadable(String),
    /// The container parsed but lists no sheets.
    NoSheets,
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable(msg) => write!(f, "unreadable workbook: {msg}"),
            Self::NoSheets => write!(f, "workbook contains no sheets"),
        }
    }
}

impl std::error::Error for ImportError {}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportError(pub String);

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "export failed: {}", self.0)
    }
}

impl std::error::Error for ExportError {}

/// Parse workbook bytes. `text_sheet_name` names the single sheet produced
/// from delimited text (spreadsheet containers carry their own names).
pub fn read_workbook(bytes: &[u8], text_sheet_name: &str) -> Result<Workbook, ImportError> {
    let format = detect_format(bytes)
        .ok_or_else(|| ImportError::Unreadable("not a spreadsheet or delimited text file".to_string()))?;

    let workbook = match format {
        Format::Zip | Format::Ole => xlsx::import_bytes(bytes)?,
        Format::Delimited => {
            let sheet = csv::import_bytes(bytes, text_sheet_name)?;
            Workbook::from_sheets(sheet.into_iter().collect())
                .map_err(|e| ImportError::Unreadable(e.to_string()))?
        }
    };

    log::info!(
        "imported {:?} workbook: {} sheet(s), {} row(s)",
        format,
        workbook.sheet_count(),
        workbook.total_rows()
    );
    Ok(workbook)
}

/// Serialize to xlsx bytes.
pub fn write_workbook(workbook: &Workbook) -> Result<Vec<u8>, ExportError> {
    xlsx::export_bytes(workbook)
}

// ============================================================================
// Grid → Sheet
// ============================================================================

/// Build a sheet from a raw grid whose first non-blank row is the header.
///
/// Blank headers become `Column_<n>` (1-based), repeated headers get `_2`,
/// `_3`... suffixes, and fully blank rows are dropped. Returns `None` for a
/// grid with no non-blank row at all.
pub(crate) fn sheet_from_grid(name: &str, grid: Vec<Vec<CellValue>>) -> Option<Sheet> {
    let mut rows = grid.into_iter().filter(|r| r.iter().any(|c| !c.is_empty()));
    let header_row = rows.next()?;
    let data: Vec<Vec<CellValue>> = rows.collect();

    let width = data
        .iter()
        .map(|r| used_width(r))
        .chain(std::iter::once(used_width(&header_row)))
        .max()
        .unwrap_or(0);

    let mut headers: Vec<String> = Vec::with_capacity(width);
    for col in 0..width {
        let raw = header_row.get(col).map(|c| c.display().trim().to_string()).unwrap_or_default();
        let base = if raw.is_empty() { format!("Column_{}", col + 1) } else { raw };
        headers.push(unique_header(&headers, base));
    }

    let mut sheet = Sheet::new(name, headers);
    for row in data {
        sheet.push_row(row);
    }
    Some(sheet)
}

fn used_width(row: &[CellValue]) -> usize {
    row.iter().rposition(|c| !c.is_empty()).map(|i| i + 1).unwrap_or(0)
}

fn unique_header(existing: &[String], base: String) -> String {
    let taken = |name: &str| existing.iter().any(|h| h.eq_ignore_ascii_case(name));
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.into())
    }

    #[test]
    fn detects_formats() {
        assert_eq!(detect_format(b"PK\x03\x04rest"), Some(Format::Zip));
        assert_eq!(detect_format(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0]), Some(Format::Ole));
        assert_eq!(detect_format(b"a,b\n1,2\n"), Some(Format::Delimited));
        assert_eq!(detect_format(b""), None);
        assert_eq!(detect_format(b" \n\t"), None);
        assert_eq!(detect_format(&[0x7f, 0x45, 0x4c, 0x46, 0x00, 0x01]), None);
    }

    #[test]
    fn headers_normalized() {
        let grid = vec![
            vec![CellValue::Empty, CellValue::Empty],
            vec![text("Amount"), CellValue::Empty, text("amount"), text("Amount")],
            vec![CellValue::Number(1.0), CellValue::Number(2.0), CellValue::Number(3.0), CellValue::Number(4.0)],
            vec![CellValue::Empty, CellValue::Empty],
            vec![CellValue::Number(5.0)],
        ];
        let sheet = sheet_from_grid("S", grid).unwrap();
        assert_eq!(sheet.headers(), ["Amount", "Column_2", "amount_2", "Amount_3"].map(String::from));
        assert_eq!(sheet.row_count(), 2);
        assert_eq!(sheet.cell(1, 3), &CellValue::Empty);
    }

    #[test]
    fn data_wider_than_header_gets_named_columns() {
        let grid = vec![
            vec![text("A")],
            vec![CellValue::Number(1.0), CellValue::Number(2.0)],
        ];
        let sheet = sheet_from_grid("S", grid).unwrap();
        assert_eq!(sheet.headers(), ["A", "Column_2"].map(String::from));
    }

    #[test]
    fn blank_grid_yields_nothing() {
        assert!(sheet_from_grid("S", vec![vec![CellValue::Empty]]).is_none());
    }

    #[test]
    fn read_rejects_garbage() {
        assert!(matches!(read_workbook(b"", "Sheet1"), Err(ImportError::Unreadable(_))));
        assert!(matches!(read_workbook(b"PK\x03\x04garbage", "Sheet1"), Err(ImportError::Unreadable(_))));
    }
}
