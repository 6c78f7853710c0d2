use serde::{Deserialize, Serialize};

use crate::cell::CellValue;
use crate::sheet::Sheet;

/// Ordered collection of uniquely named sheets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSheet(pub String);

impl std::fmt::Display for DuplicateSheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sheet '{}' already exists", self.0)
    }
}

impl std::error::Error for DuplicateSheet {}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sheets(sheets: Vec<Sheet>) -> Result<Self, DuplicateSheet> {
        let mut wb = Self::new();
        for sheet in sheets {
            wb.add_sheet(sheet)?;
        }
        Ok(wb)
    }

    /// Sheet names compare case-insensitively, matching spreadsheet apps.
    pub fn add_sheet(&mut self, sheet: Sheet) -> Result<(), DuplicateSheet> {
        if self.sheet_index(&sheet.name).is_some() {
            return Err(DuplicateSheet(sheet.name));
        }
        self.sheets.push(sheet);
        Ok(())
    }

    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheet_index(name).map(|i| &self.sheets[i])
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheet_index(name).map(move |i| &mut self.sheets[i])
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn total_rows(&self) -> usize {
        self.sheets.iter().map(Sheet::row_count).sum()
    }

    /// No sheet has any data row.
    pub fn is_empty_dataset(&self) -> bool {
        self.total_rows() == 0
    }

    /// Content hash over sheet names, headers and typed cell values.
    /// Equal workbooks hash equal regardless of how they were produced.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for sheet in &self.sheets {
            hash_str(&mut hasher, b'S', &sheet.name);
            for header in sheet.headers() {
                hash_str(&mut hasher, b'H', header);
            }
            for row in sheet.rows() {
                hasher.update(b"R");
                for cell in row {
                    hash_cell(&mut hasher, cell);
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

fn hash_str(hasher: &mut blake3::Hasher, tag: u8, s: &str) {
    hasher.update(&[tag]);
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_cell(hasher: &mut blake3::Hasher, cell: &CellValue) {
    match cell {
        CellValue::Empty => {
            hasher.update(b"e");
        }
        CellValue::Number(n) => {
            hasher.update(b"n");
            hasher.update(&n.to_bits().to_le_bytes());
        }
        CellValue::Text(s) => hash_str(hasher, b't', s),
        CellValue::Bool(b) => {
            hasher.update(if *b { b"T" } else { b"F" });
        }
        CellValue::Date(d) => hash_str(hasher, b'd', &d.format("%Y-%m-%d").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(name: &str) -> Sheet {
        let mut s = Sheet::new(name, vec!["A".into()]);
        s.push_row(vec![CellValue::Number(1.0)]);
        s
    }

    #[test]
    fn duplicate_names_rejected_case_insensitively() {
        let err = Workbook::from_sheets(vec![sheet("Targets"), sheet("targets")]).unwrap_err();
        assert_eq!(err, DuplicateSheet("targets".into()));
    }

    #[test]
    fn lookup_ignores_case() {
        let wb = Workbook::from_sheets(vec![sheet("Targets")]).unwrap();
        assert!(wb.sheet("TARGETS").is_some());
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = Workbook::from_sheets(vec![sheet("S")]).unwrap();
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = a.clone();
        c.sheet_mut("S").unwrap().push_row(vec![CellValue::Number(2.0)]);
        assert_ne!(a.fingerprint(), c.fingerprint());

        // Text "1" and number 1 are different content
        let mut d = Sheet::new("S", vec!["A".into()]);
        d.push_row(vec![CellValue::Text("1".into())]);
        let d = Workbook::from_sheets(vec![d]).unwrap();
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn empty_dataset() {
        let wb = Workbook::from_sheets(vec![Sheet::new("S", vec!["A".into()])]).unwrap();
        assert!(wb.is_empty_dataset());
    }
}
