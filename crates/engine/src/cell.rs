use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single typed cell value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
}

/// Coarse kind of a value, used for sniffing and type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Empty,
    Number,
    Date,
    Bool,
    Text,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Number => write!(f, "number"),
            Self::Date => write!(f, "date"),
            Self::Bool => write!(f, "boolean"),
            Self::Text => write!(f, "text"),
        }
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

impl CellValue {
    /// Interpret raw text input (CSV fields, ISO strings from xlsx).
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            if num.is_finite() {
                return CellValue::Number(num);
            }
        }

        if let Some(date) = parse_date(trimmed) {
            return CellValue::Date(date);
        }

        if trimmed.eq_ignore_ascii_case("true") {
            return CellValue::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return CellValue::Bool(false);
        }

        CellValue::Text(input.to_string())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            CellValue::Empty => ValueKind::Empty,
            CellValue::Number(_) => ValueKind::Number,
            CellValue::Text(_) => ValueKind::Text,
            CellValue::Bool(_) => ValueKind::Bool,
            CellValue::Date(_) => ValueKind::Date,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view. Text is parsed leniently (`$1,200` → 1200).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => lenient_parse_f64(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::Text(s) => parse_date(s.trim()),
            _ => None,
        }
    }

    /// Display form. Integers print without decimals.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Strip `$`, `,`, whitespace, then parse as f64.
pub fn lenient_parse_f64(s: &str) -> Option<f64> {
    let stripped: String = s.chars().filter(|c| *c != '$' && *c != ',').collect();
    stripped.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse the date spellings we accept in text cells.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    None
}

// ============================================================================
// Value sniffing
// ============================================================================

/// Per-kind vote counts over a bounded sample of non-empty cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindVotes {
    pub number: usize,
    pub date: usize,
    pub bool: usize,
    pub text: usize,
}

impl KindVotes {
    pub fn record(&mut self, value: &CellValue) {
        match value.kind() {
            ValueKind::Number => self.number += 1,
            ValueKind::Date => self.date += 1,
            ValueKind::Bool => self.bool += 1,
            ValueKind::Text => {
                // Numeric-looking text ("$1,200") votes as a number
                if value.as_number().is_some() {
                    self.number += 1;
                } else if value.as_date().is_some() {
                    self.date += 1;
                } else {
                    self.text += 1;
                }
            }
            ValueKind::Empty => {}
        }
    }

    pub fn total(&self) -> usize {
        self.number + self.date + self.bool + self.text
    }

    /// Majority kind. Ties go to text; no votes means empty.
    pub fn winner(&self) -> ValueKind {
        if self.total() == 0 {
            return ValueKind::Empty;
        }
        let tallies = [
            (ValueKind::Number, self.number),
            (ValueKind::Date, self.date),
            (ValueKind::Bool, self.bool),
            (ValueKind::Text, self.text),
        ];
        let best = tallies.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let mut leaders = tallies.iter().filter(|(_, n)| *n == best);
        match (leaders.next(), leaders.next()) {
            (Some((kind, _)), None) => *kind,
            _ => ValueKind::Text,
        }
    }
}
