use serde::{Deserialize, Serialize};
use sheetwright_engine::ValueKind;
use sheetwright_protocol::Operation;

/// Inferred meaning of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Numeric,
    Date,
    Category,
    Text,
    Identifier,
}

impl SemanticType {
    /// Storage kind a column of this type usually has.
    pub fn value_kind(self) -> ValueKind {
        match self {
            SemanticType::Numeric => ValueKind::Number,
            SemanticType::Date => ValueKind::Date,
            SemanticType::Category | SemanticType::Text | SemanticType::Identifier => ValueKind::Text,
        }
    }

    /// Usable as a join or grouping key.
    pub fn is_key_like(self) -> bool {
        matches!(self, SemanticType::Identifier | SemanticType::Category)
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::Date => write!(f, "date"),
            Self::Category => write!(f, "category"),
            Self::Text => write!(f, "text"),
            Self::Identifier => write!(f, "identifier"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub semantic: SemanticType,
    /// Majority storage kind of the sample.
    pub kind: ValueKind,
    /// Non-empty cells in the sample.
    pub sampled: usize,
    /// Distinct normalized values in the sample.
    pub distinct: usize,
}

impl ColumnSchema {
    /// Column with the storage kind implied by its semantic type and no
    /// sample statistics.
    pub fn new(name: impl Into<String>, semantic: SemanticType) -> Self {
        Self { name: name.into(), semantic, kind: semantic.value_kind(), sampled: 0, distinct: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSchema {
    pub name: String,
    pub row_count: usize,
    pub columns: Vec<ColumnSchema>,
}

impl SheetSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Case-insensitive, the same test the compiler applies to new columns.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn columns_of(&self, semantic: SemanticType) -> impl Iterator<Item = &ColumnSchema> + '_ {
        self.columns.iter().filter(move |c| c.semantic == semantic)
    }
}

/// Which question family a template feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateGroup {
    Derive,
    Summarize,
    Filter,
    Sort,
    Merge,
}

/// A canonical candidate transformation detected from the schema.
/// Classifiers match free text against these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub group: TemplateGroup,
    /// Sheet the question is asked about (the left sheet for merges).
    pub sheet: String,
    pub summary: String,
    /// Phrases that signal this intent ("profit margin", "by month").
    pub triggers: Vec<String>,
    /// Sheet and column names; mentions raise confidence.
    pub subjects: Vec<String>,
    pub operations: Vec<Operation>,
}

/// Schema snapshot plus detected templates. The compiler works only from
/// this, never from the live workbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sheets: Vec<SheetSchema>,
    pub templates: Vec<Template>,
    /// Fingerprint of the workbook this was computed from.
    pub fingerprint: String,
}

impl AnalysisResult {
    pub fn sheet(&self, name: &str) -> Option<&SheetSchema> {
        self.sheets.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn template(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }
}
