// Canonical candidate transformations detected from a schema snapshot

use sheetwright_protocol::{AggregateFn, CompareOp, DerivedExpr, Literal, Operation, Predicate, SortKey};

use crate::model::{ColumnSchema, SemanticType, SheetSchema, Template, TemplateGroup};
use crate::text::{mentions_any, tokens, unique_name};

const REVENUE_WORDS: &[&str] = &["revenue", "sales", "income"];
const SPEND_WORDS: &[&str] = &["spend", "cost", "expense"];
const ACQUISITION_WORDS: &[&str] = &["acquisition", "conversion", "lead"];
const DATE_SORT_TRIGGERS: &[&str] =
    &["newest first", "latest first", "most recent", "sort by date", "sort", "order by date", "chronological"];
const VALUE_SORT_TRIGGERS: &[&str] =
    &["largest first", "biggest first", "highest first", "descending", "sort", "rank"];
const AMOUNT_WORDS: &[&str] = &["amount", "total", "value", "revenue", "sales", "price", "spend", "cost"];
const ROW_TOTAL_TRIGGERS: &[&str] =
    &["row total", "row totals", "total per row", "total for each row", "add up each row", "sum across"];
const SHARE_TRIGGERS: &[&str] =
    &["percentage", "percentages", "percent of total", "share of total", "proportion of total"];

/// Detect templates for every sheet, then cross-sheet merges. Order is
/// fixed: it drives question order.
pub fn detect_templates(sheets: &[SheetSchema]) -> Vec<Template> {
    let mut out = Vec::new();
    for sheet in sheets {
        derived_columns(sheet, &mut out);
        monthly_summary(sheet, &mut out);
        category_summaries(sheet, &mut out);
        positive_filter(sheet, &mut out);
        blank_category_filter(sheet, &mut out);
        default_sort(sheet, &mut out);
    }
    merges(sheets, &mut out);
    distinct_ids(&mut out);
    out
}

/// A category literally named "month" would share the monthly summary's id;
/// later duplicates get a numeric suffix.
fn distinct_ids(templates: &mut [Template]) {
    let mut seen: Vec<String> = Vec::with_capacity(templates.len());
    for template in templates.iter_mut() {
        if seen.contains(&template.id) {
            template.id = unique_name(&template.id, |id| seen.iter().any(|s| s == id));
        }
        seen.push(template.id.clone());
    }
}

fn numeric_like<'a>(sheet: &'a SheetSchema, words: &[&str]) -> Option<&'a ColumnSchema> {
    sheet.columns_of(SemanticType::Numeric).find(|c| mentions_any(&c.name, words))
}

/// Amount-like numeric column, else the first numeric column.
fn value_column(sheet: &SheetSchema) -> Option<&ColumnSchema> {
    numeric_like(sheet, AMOUNT_WORDS).or_else(|| sheet.columns_of(SemanticType::Numeric).next())
}

fn subjects(sheet: &SheetSchema, columns: &[&str]) -> Vec<String> {
    std::iter::once(sheet.name.clone())
        .chain(columns.iter().map(|c| c.to_string()))
        .collect()
}

fn phrases(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ----------------------------------------------------------------------------
// Derived columns
// ----------------------------------------------------------------------------

fn derived_columns(sheet: &SheetSchema, out: &mut Vec<Template>) {
    let revenue = numeric_like(sheet, REVENUE_WORDS);
    let spend = numeric_like(sheet, SPEND_WORDS);
    let acquisitions = numeric_like(sheet, ACQUISITION_WORDS);

    let numeric: Vec<String> = sheet.columns_of(SemanticType::Numeric).map(|c| c.name.clone()).collect();
    let amount = numeric_like(sheet, AMOUNT_WORDS);

    let mut derive = |name: &str, expr: DerivedExpr, triggers: &[&str]| {
        if sheet.has_column(name) {
            return;
        }
        let cols: Vec<&str> = expr.columns();
        out.push(Template {
            id: format!("derive:{}:{}", sheet.name, name),
            group: TemplateGroup::Derive,
            sheet: sheet.name.clone(),
            summary: format!("Add a '{name}' column to '{}' ({})", sheet.name, expr.describe()),
            triggers: phrases(triggers),
            subjects: subjects(sheet, &cols),
            operations: vec![Operation::AddColumn {
                sheet: sheet.name.clone(),
                name: name.to_string(),
                expr: expr.clone(),
            }],
        });
    };

    if let (Some(rev), Some(sp)) = (revenue, spend) {
        derive(
            "Profit_Margin",
            DerivedExpr::Ratio { numerator: rev.name.clone(), denominator: sp.name.clone() },
            &["profit margin", "margin", "margins", "roas", "return on spend"],
        );
        derive(
            "Net_Profit",
            DerivedExpr::Difference { left: rev.name.clone(), right: sp.name.clone() },
            &["net profit", "profit", "net income", "earnings"],
        );
    }
    if let (Some(sp), Some(acq)) = (spend, acquisitions) {
        derive(
            "Cost_Per_Acquisition",
            DerivedExpr::Ratio { numerator: sp.name.clone(), denominator: acq.name.clone() },
            &["cost per acquisition", "cpa", "cost per conversion", "cost per lead"],
        );
    }
    if numeric.len() > 1 {
        derive("Row_Total", DerivedExpr::Sum { columns: numeric }, ROW_TOTAL_TRIGGERS);
    }
    if let Some(amount) = amount {
        derive(
            &format!("{}_Percentage", amount.name),
            DerivedExpr::Share { column: amount.name.clone() },
            SHARE_TRIGGERS,
        );
    }
}

// ----------------------------------------------------------------------------
// Summaries
// ----------------------------------------------------------------------------

fn monthly_summary(sheet: &SheetSchema, out: &mut Vec<Template>) {
    let (Some(date), Some(value)) = (sheet.columns_of(SemanticType::Date).next(), value_column(sheet)) else {
        return;
    };
    let month = unique_name("Month", |n| sheet.has_column(n));

    out.push(Template {
        id: format!("summarize:{}:month", sheet.name),
        group: TemplateGroup::Summarize,
        sheet: sheet.name.clone(),
        summary: format!("Monthly totals of '{}' by '{}'", value.name, date.name),
        triggers: phrases(&["monthly", "by month", "per month", "each month", "month", "months"]),
        subjects: subjects(sheet, &[date.name.as_str(), value.name.as_str()]),
        operations: vec![
            Operation::AddColumn {
                sheet: sheet.name.clone(),
                name: month.clone(),
                expr: DerivedExpr::MonthStart { column: date.name.clone() },
            },
            Operation::Aggregate {
                sheet: sheet.name.clone(),
                group_by: month,
                value_column: value.name.clone(),
                function: AggregateFn::Sum,
                target: format!("{}_Monthly", sheet.name),
            },
        ],
    });
}

/// Per category column: a sum of the value column when there is one, and
/// always a row count with each group's share of all rows.
fn category_summaries(sheet: &SheetSchema, out: &mut Vec<Template>) {
    let value = value_column(sheet);
    for category in sheet.columns_of(SemanticType::Category) {
        let words = tokens(&category.name).join(" ");

        if let Some(value) = value {
            out.push(Template {
                id: format!("summarize:{}:{}", sheet.name, category.name),
                group: TemplateGroup::Summarize,
                sheet: sheet.name.clone(),
                summary: format!("Sum of '{}' per '{}'", value.name, category.name),
                triggers: vec![
                    format!("by {words}"),
                    format!("per {words}"),
                    format!("each {words}"),
                    format!("{words} summary"),
                    format!("{words} totals"),
                    format!("{words} breakdown"),
                ],
                subjects: subjects(sheet, &[category.name.as_str(), value.name.as_str()]),
                operations: vec![Operation::Aggregate {
                    sheet: sheet.name.clone(),
                    group_by: category.name.clone(),
                    value_column: value.name.clone(),
                    function: AggregateFn::Sum,
                    target: format!("{}_by_{}", sheet.name, category.name),
                }],
            });
        }

        let target = format!("{}_{}_Count", sheet.name, category.name);
        out.push(Template {
            id: format!("summarize:{}:{}:count", sheet.name, category.name),
            group: TemplateGroup::Summarize,
            sheet: sheet.name.clone(),
            summary: format!("Count of rows per '{}', with each one's percentage", category.name),
            triggers: vec![
                format!("count by {words}"),
                format!("count per {words}"),
                format!("{words} count"),
                format!("{words} counts"),
                format!("how many per {words}"),
                format!("{words} percentage"),
            ],
            subjects: subjects(sheet, &[category.name.as_str()]),
            operations: vec![
                Operation::Aggregate {
                    sheet: sheet.name.clone(),
                    group_by: category.name.clone(),
                    value_column: category.name.clone(),
                    function: AggregateFn::Count,
                    target: target.clone(),
                },
                Operation::AddColumn {
                    sheet: target,
                    name: "Percentage".to_string(),
                    expr: DerivedExpr::Share { column: format!("{}_{}", category.name, AggregateFn::Count) },
                },
            ],
        });
    }
}

// ----------------------------------------------------------------------------
// Filter / sort
// ----------------------------------------------------------------------------

fn positive_filter(sheet: &SheetSchema, out: &mut Vec<Template>) {
    let Some(amount) = numeric_like(sheet, AMOUNT_WORDS) else {
        return;
    };
    out.push(Template {
        id: format!("filter:{}:{}:positive", sheet.name, amount.name),
        group: TemplateGroup::Filter,
        sheet: sheet.name.clone(),
        summary: format!("Keep only rows of '{}' where '{}' is greater than 0", sheet.name, amount.name),
        triggers: phrases(&[
            "positive",
            "greater than zero",
            "above zero",
            "remove zero",
            "remove negative",
            "drop negative",
            "exclude negative",
            "filter",
        ]),
        subjects: subjects(sheet, &[amount.name.as_str()]),
        operations: vec![Operation::Filter {
            sheet: sheet.name.clone(),
            predicate: Predicate { column: amount.name.clone(), op: CompareOp::Gt, value: Literal::Number(0.0) },
        }],
    });
}

/// Rows whose first category column is blank.
fn blank_category_filter(sheet: &SheetSchema, out: &mut Vec<Template>) {
    let Some(category) = sheet.columns_of(SemanticType::Category).next() else {
        return;
    };
    let words = tokens(&category.name).join(" ");
    out.push(Template {
        id: format!("filter:{}:{}:not_empty", sheet.name, category.name),
        group: TemplateGroup::Filter,
        sheet: sheet.name.clone(),
        summary: format!("Drop rows of '{}' with an empty '{}'", sheet.name, category.name),
        triggers: vec![
            format!("empty {words}"),
            format!("blank {words}"),
            format!("missing {words}"),
            "remove blanks".to_string(),
            "drop blank rows".to_string(),
            "remove empty rows".to_string(),
        ],
        subjects: subjects(sheet, &[category.name.as_str()]),
        operations: vec![Operation::Filter {
            sheet: sheet.name.clone(),
            predicate: Predicate::not_empty(category.name.clone()),
        }],
    });
}

fn default_sort(sheet: &SheetSchema, out: &mut Vec<Template>) {
    let (column, summary, triggers): (&ColumnSchema, String, &[&str]) =
        if let Some(date) = sheet.columns_of(SemanticType::Date).next() {
            (
                date,
                format!("Sort '{}' by '{}', newest first", sheet.name, date.name),
                DATE_SORT_TRIGGERS,
            )
        } else if let Some(num) = value_column(sheet) {
            (
                num,
                format!("Sort '{}' by '{}', largest first", sheet.name, num.name),
                VALUE_SORT_TRIGGERS,
            )
        } else {
            return;
        };

    out.push(Template {
        id: format!("sort:{}:{}", sheet.name, column.name),
        group: TemplateGroup::Sort,
        sheet: sheet.name.clone(),
        summary,
        triggers: phrases(triggers),
        subjects: subjects(sheet, &[column.name.as_str()]),
        operations: vec![Operation::Sort {
            sheet: sheet.name.clone(),
            keys: vec![SortKey { column: column.name.clone(), descending: true }],
        }],
    });
}

// ----------------------------------------------------------------------------
// Merge
// ----------------------------------------------------------------------------

/// Pairs of sheets sharing a key-like column name (case-insensitive).
fn merges(sheets: &[SheetSchema], out: &mut Vec<Template>) {
    for (i, left) in sheets.iter().enumerate() {
        for right in &sheets[i + 1..] {
            let shared = left.columns.iter().find_map(|lc| {
                right
                    .columns
                    .iter()
                    .find(|rc| {
                        rc.name.eq_ignore_ascii_case(&lc.name)
                            && (lc.semantic.is_key_like() || rc.semantic.is_key_like())
                    })
                    .map(|rc| (lc, rc))
            });
            let Some((lk, rk)) = shared else { continue };

            out.push(Template {
                id: format!("merge:{}:{}:{}", left.name, right.name, lk.name),
                group: TemplateGroup::Merge,
                sheet: left.name.clone(),
                summary: format!(
                    "Combine '{}' with '{}' on '{}'",
                    left.name, right.name, lk.name
                ),
                triggers: phrases(&["merge", "combine", "join", "lookup", "match up", "bring together"]),
                subjects: vec![left.name.clone(), right.name.clone(), lk.name.clone()],
                operations: vec![Operation::Merge {
                    left: left.name.clone(),
                    right: right.name.clone(),
                    left_key: lk.name.clone(),
                    right_key: rk.name.clone(),
                    target: format!("{}_{}", left.name, right.name),
                }],
            });
        }
    }
}
