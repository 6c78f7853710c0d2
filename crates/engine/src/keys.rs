// Typed keys for grouping, joining and sorting

use std::cmp::Ordering;

use chrono::NaiveDate;
use ordered_float::OrderedFloat;

use crate::cell::CellValue;

/// Normalized key for equality/hashing (grouping and join lookups).
/// Text is trimmed + lowercased so "North" and " north" land together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NormalizedKey {
    Number(OrderedFloat<f64>),
    Date(NaiveDate),
    Text(String),
    Bool(bool),
    Blank,
}

impl NormalizedKey {
    pub fn from_value(value: &CellValue) -> Self {
        match value {
            CellValue::Empty => NormalizedKey::Blank,
            CellValue::Number(n) => NormalizedKey::Number(OrderedFloat(*n)),
            CellValue::Date(d) => NormalizedKey::Date(*d),
            CellValue::Bool(b) => NormalizedKey::Bool(*b),
            CellValue::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    NormalizedKey::Blank
                } else {
                    NormalizedKey::Text(t.to_lowercase())
                }
            }
        }
    }

    /// Key used for join matching. Numeric text joins numbers ("7" == 7).
    pub fn for_join(value: &CellValue) -> Self {
        match value {
            CellValue::Text(s) => match crate::cell::lenient_parse_f64(s) {
                Some(n) => NormalizedKey::Number(OrderedFloat(n)),
                None => Self::from_value(value),
            },
            _ => Self::from_value(value),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, NormalizedKey::Blank)
    }

    /// Type rank: Numbers(0) < Dates(1) < Text(2) < Bool(3) < Blank(4)
    fn type_rank(&self) -> u8 {
        match self {
            NormalizedKey::Number(_) => 0,
            NormalizedKey::Date(_) => 1,
            NormalizedKey::Text(_) => 2,
            NormalizedKey::Bool(_) => 3,
            NormalizedKey::Blank => 4,
        }
    }
}

/// Compare two cells for a sort key. Blanks sort last in both directions.
pub fn compare_cells(a: &CellValue, b: &CellValue, descending: bool) -> Ordering {
    let ka = NormalizedKey::from_value(a);
    let kb = NormalizedKey::from_value(b);

    match (ka.is_blank(), kb.is_blank()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }

    let ord = ka
        .type_rank()
        .cmp(&kb.type_rank())
        .then_with(|| ka.cmp(&kb));
    if descending {
        ord.reverse()
    } else {
        ord
    }
}
