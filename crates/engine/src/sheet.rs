use serde::{Deserialize, Serialize};

use crate::cell::{CellValue, KindVotes, ValueKind};
use crate::keys::compare_cells;

static EMPTY: CellValue = CellValue::Empty;

/// A named table: one header row plus data rows.
///
/// Every row has exactly `headers.len()` cells. `push_row` pads or
/// truncates to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    headers: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self { name: name.into(), headers, rows: Vec::new() }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Exact header match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.headers.len(), CellValue::Empty);
        self.rows.push(row);
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
    }

    /// Iterate one column top to bottom.
    pub fn column(&self, col: usize) -> impl Iterator<Item = &CellValue> + '_ {
        self.rows.iter().map(move |r| r.get(col).unwrap_or(&EMPTY))
    }

    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[CellValue]) -> bool,
    {
        self.rows.retain(|r| keep(r));
    }

    /// Append a column. `values` must have one entry per row.
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<CellValue>) {
        debug_assert_eq!(values.len(), self.rows.len());
        self.headers.push(name.into());
        let mut values = values.into_iter();
        for row in &mut self.rows {
            row.push(values.next().unwrap_or_default());
        }
    }

    /// Stable multi-key sort. `keys` are (column index, descending).
    pub fn sort_by_columns(&mut self, keys: &[(usize, bool)]) {
        self.rows.sort_by(|a, b| {
            keys.iter()
                .map(|&(col, desc)| compare_cells(&a[col], &b[col], desc))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Majority kind of a column over the first `sample_limit` non-empty cells.
    pub fn dominant_kind(&self, col: usize, sample_limit: usize) -> ValueKind {
        self.kind_votes(col, sample_limit).winner()
    }

    pub fn kind_votes(&self, col: usize, sample_limit: usize) -> KindVotes {
        let mut votes = KindVotes::default();
        for value in self.column(col).filter(|v| !v.is_empty()).take(sample_limit) {
            votes.record(value);
        }
        votes
    }
}
