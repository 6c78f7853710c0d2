//! Schema analysis: per-column semantic types from header names plus a
//! bounded majority-vote sample of values.

use rustc_hash::FxHashSet;
use sheetwright_engine::keys::NormalizedKey;
use sheetwright_engine::{Sheet, ValueKind, Workbook};

use crate::model::{AnalysisResult, ColumnSchema, SemanticType, SheetSchema};
use crate::templates::detect_templates;
use crate::text::mentions_any;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisOptions {
    /// Non-empty cells sampled per column.
    pub sample_limit: usize,
    /// Upper bound on distinct values for a `category` column.
    pub category_max_distinct: usize,
    /// Upper bound on generated structured questions.
    pub max_questions: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self { sample_limit: 200, category_max_distinct: 20, max_questions: 8 }
    }
}

const IDENTIFIER_WORDS: &[&str] = &["id", "key", "code", "ref", "sku", "uuid"];
const CATEGORY_WORDS: &[&str] = &[
    "category", "type", "status", "channel", "region", "segment", "department", "class", "group",
    "source", "tier",
];

pub fn analyze(workbook: &Workbook, options: &AnalysisOptions) -> AnalysisResult {
    let sheets: Vec<SheetSchema> = workbook.sheets().iter().map(|s| analyze_sheet(s, options)).collect();
    let templates = detect_templates(&sheets);

    log::debug!(
        "analysis: {} sheet(s), {} candidate transformation(s)",
        sheets.len(),
        templates.len()
    );

    AnalysisResult { sheets, templates, fingerprint: workbook.fingerprint() }
}

pub fn analyze_sheet(sheet: &Sheet, options: &AnalysisOptions) -> SheetSchema {
    let columns = sheet
        .headers()
        .iter()
        .enumerate()
        .map(|(col, name)| {
            let votes = sheet.kind_votes(col, options.sample_limit);
            let distinct: FxHashSet<NormalizedKey> = sheet
                .column(col)
                .filter(|v| !v.is_empty())
                .take(options.sample_limit)
                .map(NormalizedKey::from_value)
                .collect();
            let sampled = votes.total();
            let kind = votes.winner();
            ColumnSchema {
                name: name.clone(),
                semantic: infer_semantic(name, kind, distinct.len(), sampled, options),
                kind,
                sampled,
                distinct: distinct.len(),
            }
        })
        .collect();

    SheetSchema { name: sheet.name.clone(), row_count: sheet.row_count(), columns }
}

/// Combine the value-kind vote with header hints.
///
/// Numbers and dates keep their kind unless the header names an identifier
/// whose sample is all distinct. Text splits into identifier, category or
/// free text.
pub fn infer_semantic(
    header: &str,
    kind: ValueKind,
    distinct: usize,
    sampled: usize,
    options: &AnalysisOptions,
) -> SemanticType {
    let all_distinct = sampled > 0 && distinct == sampled;
    let id_header = mentions_any(header, IDENTIFIER_WORDS);

    match kind {
        ValueKind::Date => SemanticType::Date,
        ValueKind::Number if id_header && all_distinct => SemanticType::Identifier,
        ValueKind::Number => SemanticType::Numeric,
        ValueKind::Bool => SemanticType::Category,
        ValueKind::Empty => SemanticType::Text,
        ValueKind::Text => {
            if id_header && all_distinct {
                SemanticType::Identifier
            } else if mentions_any(header, CATEGORY_WORDS) {
                SemanticType::Category
            } else if sampled > 0
                && distinct <= options.category_max_distinct
                && distinct * 2 <= sampled
            {
                SemanticType::Category
            } else {
                SemanticType::Text
            }
        }
    }
}
