// Transformation operations and plans

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Reported for a plan forced by the retry cap.
pub const FALLBACK_MESSAGE: &str = "could not understand, no changes applied";

/// One atomic spreadsheet transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AddColumn {
        sheet: String,
        name: String,
        expr: DerivedExpr,
    },
    Filter {
        sheet: String,
        predicate: Predicate,
    },
    /// Writes `target` as a new sheet; never overwrites an input sheet.
    Aggregate {
        sheet: String,
        group_by: String,
        value_column: String,
        function: AggregateFn,
        target: String,
    },
    /// Left-outer join of `left` and `right` into a new sheet `target`.
    Merge {
        left: String,
        right: String,
        left_key: String,
        right_key: String,
        target: String,
    },
    Sort {
        sheet: String,
        keys: Vec<SortKey>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AddColumn,
    Filter,
    Aggregate,
    Merge,
    Sort,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddColumn => write!(f, "add_column"),
            Self::Filter => write!(f, "filter"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::Merge => write!(f, "merge"),
            Self::Sort => write!(f, "sort"),
        }
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::AddColumn { .. } => OperationKind::AddColumn,
            Operation::Filter { .. } => OperationKind::Filter,
            Operation::Aggregate { .. } => OperationKind::Aggregate,
            Operation::Merge { .. } => OperationKind::Merge,
            Operation::Sort { .. } => OperationKind::Sort,
        }
    }

    /// Every (sheet, column) pair this operation reads.
    pub fn column_refs(&self) -> Vec<(&str, &str)> {
        match self {
            Operation::AddColumn { sheet, expr, .. } => {
                expr.columns().into_iter().map(|c| (sheet.as_str(), c)).collect()
            }
            Operation::Filter { sheet, predicate } => vec![(sheet.as_str(), predicate.column.as_str())],
            Operation::Aggregate { sheet, group_by, value_column, .. } => vec![
                (sheet.as_str(), group_by.as_str()),
                (sheet.as_str(), value_column.as_str()),
            ],
            Operation::Merge { left, right, left_key, right_key, .. } => vec![
                (left.as_str(), left_key.as_str()),
                (right.as_str(), right_key.as_str()),
            ],
            Operation::Sort { sheet, keys } => {
                keys.iter().map(|k| (sheet.as_str(), k.column.as_str())).collect()
            }
        }
    }

    /// Human-readable one-liner for modification logs and summaries.
    pub fn describe(&self) -> String {
        match self {
            Operation::AddColumn { sheet, name, expr } => {
                format!("add column '{name}' to '{sheet}' = {}", expr.describe())
            }
            Operation::Filter { sheet, predicate } => {
                format!("keep rows of '{sheet}' where {}", predicate.describe())
            }
            Operation::Aggregate { sheet, group_by, value_column, function, target } => {
                format!("summarize '{sheet}': {function} of '{value_column}' by '{group_by}' into '{target}'")
            }
            Operation::Merge { left, right, left_key, right_key, target } => {
                format!("merge '{left}'.'{left_key}' with '{right}'.'{right_key}' into '{target}'")
            }
            Operation::Sort { sheet, keys } => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|k| format!("'{}' {}", k.column, if k.descending { "desc" } else { "asc" }))
                    .collect();
                format!("sort '{sheet}' by {}", keys.join(", "))
            }
        }
    }
}

/// Closed set of derived-column expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fn", rename_all = "snake_case")]
pub enum DerivedExpr {
    Ratio { numerator: String, denominator: String },
    Difference { left: String, right: String },
    Product { left: String, right: String },
    Sum { columns: Vec<String> },
    /// Each row's value as a percentage of the column total, two decimals.
    Share { column: String },
    /// First day of the month of a date column.
    MonthStart { column: String },
}

impl DerivedExpr {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            DerivedExpr::Ratio { numerator, denominator } => {
                vec![numerator.as_str(), denominator.as_str()]
            }
            DerivedExpr::Difference { left, right } | DerivedExpr::Product { left, right } => {
                vec![left.as_str(), right.as_str()]
            }
            DerivedExpr::Sum { columns } => columns.iter().map(String::as_str).collect(),
            DerivedExpr::Share { column } | DerivedExpr::MonthStart { column } => vec![column.as_str()],
        }
    }

    pub fn columns_mut(&mut self) -> Vec<&mut String> {
        match self {
            DerivedExpr::Ratio { numerator, denominator } => vec![numerator, denominator],
            DerivedExpr::Difference { left, right } | DerivedExpr::Product { left, right } => {
                vec![left, right]
            }
            DerivedExpr::Sum { columns } => columns.iter_mut().collect(),
            DerivedExpr::Share { column } | DerivedExpr::MonthStart { column } => vec![column],
        }
    }

    /// True when the result is a date rather than a number.
    pub fn yields_date(&self) -> bool {
        matches!(self, DerivedExpr::MonthStart { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            DerivedExpr::Ratio { numerator, denominator } => format!("'{numerator}' / '{denominator}'"),
            DerivedExpr::Difference { left, right } => format!("'{left}' - '{right}'"),
            DerivedExpr::Product { left, right } => format!("'{left}' * '{right}'"),
            DerivedExpr::Sum { columns } => {
                let cols: Vec<String> = columns.iter().map(|c| format!("'{c}'")).collect();
                cols.join(" + ")
            }
            DerivedExpr::Share { column } => format!("'{column}' as % of its total"),
            DerivedExpr::MonthStart { column } => format!("month of '{column}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Literal,
}

impl Predicate {
    /// `column != ""`: keeps rows whose cell is not blank.
    pub fn not_empty(column: impl Into<String>) -> Self {
        Self { column: column.into(), op: CompareOp::NotEq, value: Literal::Text(String::new()) }
    }

    pub fn is_not_empty(&self) -> bool {
        self.op == CompareOp::NotEq && matches!(&self.value, Literal::Text(t) if t.trim().is_empty())
    }

    pub fn describe(&self) -> String {
        if self.is_not_empty() {
            return format!("'{}' is not empty", self.column);
        }
        format!("'{}' {} {}", self.column, self.op.symbol(), self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Contains => "contains",
        }
    }

    /// Ordering comparisons need a number or date on both sides.
    pub fn is_ordering(&self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Lte | CompareOp::Gt | CompareOp::Gte)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Text(s) => write!(f, "\"{s}\""),
            Literal::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Mean,
    Count,
}

impl std::fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Mean => write!(f, "mean"),
            Self::Count => write!(f, "count"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Ordered, validated operations compiled from one frozen requirement set.
///
/// Fields are private: a plan is never edited after compilation. A new
/// requirement set produces a new plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationPlan {
    operations: Vec<Operation>,
    /// Compile-time corrections (fuzzy column matches etc.), surfaced in the
    /// modification log.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    notes: Vec<String>,
    #[serde(default)]
    fallback: bool,
}

impl TransformationPlan {
    pub fn new(operations: Vec<Operation>, notes: Vec<String>) -> Self {
        Self { operations, notes, fallback: false }
    }

    /// No-op plan: execution output equals the source.
    pub fn identity() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Identity plan forced by the retry cap.
    pub fn fallback() -> Self {
        Self {
            operations: Vec::new(),
            notes: vec![FALLBACK_MESSAGE.to_string()],
            fallback: true,
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
