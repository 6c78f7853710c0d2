//! Transformation executor.
//!
//! Applies a [`TransformationPlan`] in order to a working copy of the source
//! workbook. The first hard failure halts the plan; the copy is dropped and
//! nothing is returned but the error. The source is never touched.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use sheetwright_protocol::{
    AggregateFn, CompareOp, DerivedExpr, Literal, MergeStat, Operation, OperationKind, Predicate,
    RowDelta, SortKey, TransformationPlan,
};

use crate::cell::{CellValue, ValueKind};
use crate::keys::NormalizedKey;
use crate::sheet::Sheet;
use crate::workbook::Workbook;

/// Rows processed between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Rows sampled when checking a filter column's type.
const FILTER_SAMPLE: usize = 200;

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag checked by the executor between operations and row batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ExecFailure {
    UnknownSheet(String),
    UnknownColumn { sheet: String, column: String },
    InvalidFilter { column: String, reason: String },
    ColumnExists { sheet: String, column: String },
    SheetExists(String),
    Cancelled,
}

/// A plan halted at operation `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecError {
    pub index: usize,
    pub kind: OperationKind,
    pub failure: ExecFailure,
}

impl ExecError {
    /// Offending column, when the failure names one.
    pub fn column(&self) -> Option<&str> {
        match &self.failure {
            ExecFailure::UnknownColumn { column, .. }
            | ExecFailure::InvalidFilter { column, .. }
            | ExecFailure::ColumnExists { column, .. } => Some(column),
            _ => None,
        }
    }
}

impl fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSheet(sheet) => write!(f, "unknown sheet '{sheet}'"),
            Self::UnknownColumn { sheet, column } => {
                write!(f, "sheet '{sheet}': unknown column '{column}'")
            }
            Self::InvalidFilter { column, reason } => {
                write!(f, "invalid filter on '{column}': {reason}")
            }
            Self::ColumnExists { sheet, column } => {
                write!(f, "sheet '{sheet}' already has a column '{column}'")
            }
            Self::SheetExists(sheet) => write!(f, "sheet '{sheet}' already exists"),
            Self::Cancelled => write!(f, "execution cancelled"),
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation {} ({}): {}", self.index, self.kind, self.failure)
    }
}

impl std::error::Error for ExecError {}

// ============================================================================
// Execution
// ============================================================================

/// Successful run: the transformed copy plus what happened to it.
#[derive(Debug, Clone)]
pub struct Execution {
    pub workbook: Workbook,
    /// Human-readable record of every operation applied, including
    /// corrections and coercions.
    pub log: Vec<String>,
    /// Before/after row counts, affected sheets only, first-touch order.
    pub sheets: Vec<RowDelta>,
    pub merges: Vec<MergeStat>,
    pub coerced_cells: usize,
}

/// Run `plan` against a copy of `source`.
pub fn execute(
    source: &Workbook,
    plan: &TransformationPlan,
    cancel: &CancelToken,
) -> Result<Execution, ExecError> {
    let mut run = Run {
        workbook: source.clone(),
        log: plan.notes().to_vec(),
        touched: Vec::new(),
        merges: Vec::new(),
        coerced_cells: 0,
        cancel,
    };

    log::debug!("executing plan: {} operation(s)", plan.len());

    for (index, op) in plan.operations().iter().enumerate() {
        let fail = |failure| ExecError { index, kind: op.kind(), failure };
        if cancel.is_cancelled() {
            return Err(fail(ExecFailure::Cancelled));
        }
        run.apply(op).map_err(fail)?;
        log::debug!("op {index} done: {}", op.describe());
    }

    let sheets = run
        .touched
        .iter()
        .map(|name| RowDelta {
            sheet: name.clone(),
            before: source.sheet(name).map(Sheet::row_count),
            after: run.workbook.sheet(name).map(Sheet::row_count).unwrap_or(0),
        })
        .collect();

    Ok(Execution {
        workbook: run.workbook,
        log: run.log,
        sheets,
        merges: run.merges,
        coerced_cells: run.coerced_cells,
    })
}

struct Run<'a> {
    workbook: Workbook,
    log: Vec<String>,
    touched: Vec<String>,
    merges: Vec<MergeStat>,
    coerced_cells: usize,
    cancel: &'a CancelToken,
}

impl Run<'_> {
    fn apply(&mut self, op: &Operation) -> Result<(), ExecFailure> {
        match op {
            Operation::AddColumn { sheet, name, expr } => self.add_column(sheet, name, expr),
            Operation::Filter { sheet, predicate } => self.filter(sheet, predicate),
            Operation::Aggregate { sheet, group_by, value_column, function, target } => {
                self.aggregate(sheet, group_by, value_column, *function, target)
            }
            Operation::Merge { left, right, left_key, right_key, target } => {
                self.merge(left, right, left_key, right_key, target)
            }
            Operation::Sort { sheet, keys } => self.sort(sheet, keys),
        }
    }

    fn touch(&mut self, sheet: &str) {
        if !self.touched.iter().any(|s| s.eq_ignore_ascii_case(sheet)) {
            self.touched.push(sheet.to_string());
        }
    }

    fn checkpoint(&self, row: usize) -> Result<(), ExecFailure> {
        if row % CANCEL_CHECK_INTERVAL == 0 && self.cancel.is_cancelled() {
            return Err(ExecFailure::Cancelled);
        }
        Ok(())
    }

    fn sheet(&self, name: &str) -> Result<&Sheet, ExecFailure> {
        self.workbook.sheet(name).ok_or_else(|| ExecFailure::UnknownSheet(name.to_string()))
    }

    fn ensure_new_sheet(&self, name: &str) -> Result<(), ExecFailure> {
        match self.workbook.sheet(name) {
            Some(_) => Err(ExecFailure::SheetExists(name.to_string())),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // add_column
    // ------------------------------------------------------------------------

    fn add_column(&mut self, sheet_name: &str, name: &str, expr: &DerivedExpr) -> Result<(), ExecFailure> {
        let sheet = self.sheet(sheet_name)?;
        if sheet.has_column(name) {
            return Err(ExecFailure::ColumnExists { sheet: sheet.name.clone(), column: name.to_string() });
        }
        let cols = expr
            .columns()
            .into_iter()
            .map(|c| column_index(sheet, c))
            .collect::<Result<Vec<_>, _>>()?;

        // Share divides by the column total; blanks and text add nothing
        let total: f64 = match expr {
            DerivedExpr::Share { .. } => sheet.rows().iter().filter_map(|row| row[cols[0]].as_number()).sum(),
            _ => 0.0,
        };

        let mut values = Vec::with_capacity(sheet.row_count());
        let mut coerced = 0usize;
        let mut undefined = 0usize;

        for (r, row) in sheet.rows().iter().enumerate() {
            self.checkpoint(r)?;

            if expr.yields_date() {
                // Non-dates stay blank; a month bucket of zero would be meaningless
                match row[cols[0]].as_date() {
                    Some(d) => values.push(CellValue::Date(month_start(d))),
                    None => {
                        coerced += 1;
                        values.push(CellValue::Empty);
                    }
                }
                continue;
            }

            let mut nums = Vec::with_capacity(cols.len());
            for &c in &cols {
                match row[c].as_number() {
                    Some(n) => nums.push(n),
                    None => {
                        coerced += 1;
                        nums.push(0.0);
                    }
                }
            }
            let value = match expr {
                DerivedExpr::Ratio { .. } => {
                    if nums[1] == 0.0 {
                        undefined += 1;
                        CellValue::Empty
                    } else {
                        CellValue::Number(nums[0] / nums[1])
                    }
                }
                DerivedExpr::Difference { .. } => CellValue::Number(nums[0] - nums[1]),
                DerivedExpr::Product { .. } => CellValue::Number(nums[0] * nums[1]),
                DerivedExpr::Sum { .. } => CellValue::Number(nums.iter().sum()),
                DerivedExpr::Share { .. } => {
                    if total == 0.0 {
                        undefined += 1;
                        CellValue::Empty
                    } else {
                        CellValue::Number((nums[0] / total * 10_000.0).round() / 100.0)
                    }
                }
                DerivedExpr::MonthStart { .. } => CellValue::Empty,
            };
            values.push(value);
        }

        let sheet_name = sheet.name.clone();
        let mut entry = format!("added column '{name}' to '{sheet_name}' = {}", expr.describe());
        if coerced > 0 {
            let (what, default) = if expr.yields_date() {
                ("non-date", "left blank")
            } else {
                ("non-numeric", "treated as 0")
            };
            entry.push_str(&format!("; {coerced} {what} or missing source value(s) {default}"));
        }
        if undefined > 0 {
            let why = if matches!(expr, DerivedExpr::Share { .. }) { "column total of zero" } else { "zero denominator" };
            entry.push_str(&format!("; {undefined} row(s) with a {why} left blank"));
        }
        self.coerced_cells += coerced;
        self.log.push(entry);

        if let Some(sheet) = self.workbook.sheet_mut(&sheet_name) {
            sheet.add_column(name, values);
        }
        self.touch(&sheet_name);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // filter
    // ------------------------------------------------------------------------

    fn filter(&mut self, sheet_name: &str, predicate: &Predicate) -> Result<(), ExecFailure> {
        let sheet = self.sheet(sheet_name)?;
        let col = column_index(sheet, &predicate.column)?;
        check_filter(predicate, sheet.dominant_kind(col, FILTER_SAMPLE))?;

        let mut keep = Vec::with_capacity(sheet.row_count());
        for (r, row) in sheet.rows().iter().enumerate() {
            self.checkpoint(r)?;
            keep.push(predicate_matches(predicate, &row[col]));
        }

        let before = sheet.row_count();
        let sheet_name = sheet.name.clone();
        let mut verdicts = keep.into_iter();
        if let Some(sheet) = self.workbook.sheet_mut(&sheet_name) {
            sheet.retain_rows(|_| verdicts.next().unwrap_or(false));
        }
        let after = self.workbook.sheet(&sheet_name).map(Sheet::row_count).unwrap_or(0);

        self.log.push(format!(
            "kept {after} of {before} row(s) in '{sheet_name}' where {}",
            predicate.describe()
        ));
        self.touch(&sheet_name);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // aggregate
    // ------------------------------------------------------------------------

    fn aggregate(
        &mut self,
        sheet_name: &str,
        group_by: &str,
        value_column: &str,
        function: AggregateFn,
        target: &str,
    ) -> Result<(), ExecFailure> {
        let sheet = self.sheet(sheet_name)?;
        let g = column_index(sheet, group_by)?;
        let v = column_index(sheet, value_column)?;
        self.ensure_new_sheet(target)?;

        struct Group {
            label: CellValue,
            sum: f64,
            numeric: usize,
            rows: usize,
        }

        // First-occurrence order keeps output deterministic
        let mut index: FxHashMap<NormalizedKey, usize> = FxHashMap::default();
        let mut groups: Vec<Group> = Vec::new();
        let mut skipped = 0usize;

        for (r, row) in sheet.rows().iter().enumerate() {
            self.checkpoint(r)?;
            let key = NormalizedKey::from_value(&row[g]);
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(Group { label: row[g].clone(), sum: 0.0, numeric: 0, rows: 0 });
                groups.len() - 1
            });
            let group = &mut groups[slot];
            group.rows += 1;
            match row[v].as_number() {
                Some(n) => {
                    group.sum += n;
                    group.numeric += 1;
                }
                None => skipped += 1,
            }
        }

        let header = format!("{value_column}_{function}");
        let mut out = Sheet::new(target, vec![group_by.to_string(), header]);
        for group in &groups {
            let value = match function {
                AggregateFn::Sum => CellValue::Number(group.sum),
                AggregateFn::Count => CellValue::Number(group.rows as f64),
                AggregateFn::Mean if group.numeric == 0 => CellValue::Empty,
                AggregateFn::Mean => CellValue::Number(group.sum / group.numeric as f64),
            };
            out.push_row(vec![group.label.clone(), value]);
        }

        let mut entry = format!(
            "summarized '{}' into '{target}': {function} of '{value_column}' by '{group_by}' ({} group(s))",
            sheet.name,
            groups.len()
        );
        if skipped > 0 && function != AggregateFn::Count {
            entry.push_str(&format!("; {skipped} non-numeric value(s) ignored"));
        }
        self.log.push(entry);

        self.workbook
            .add_sheet(out)
            .map_err(|e| ExecFailure::SheetExists(e.0))?;
        self.touch(target);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // merge
    // ------------------------------------------------------------------------

    fn merge(
        &mut self,
        left_name: &str,
        right_name: &str,
        left_key: &str,
        right_key: &str,
        target: &str,
    ) -> Result<(), ExecFailure> {
        let left = self.sheet(left_name)?;
        let right = self.sheet(right_name)?;
        let lk = column_index(left, left_key)?;
        let rk = column_index(right, right_key)?;
        self.ensure_new_sheet(target)?;

        // First right-hand row per key wins
        let mut lookup: FxHashMap<NormalizedKey, usize> = FxHashMap::default();
        for (r, row) in right.rows().iter().enumerate() {
            self.checkpoint(r)?;
            let key = NormalizedKey::for_join(&row[rk]);
            if !key.is_blank() {
                lookup.entry(key).or_insert(r);
            }
        }

        let right_cols: Vec<usize> = (0..right.column_count()).filter(|&c| c != rk).collect();
        let headers = merged_headers(left.headers(), &right.name, right.headers(), rk);

        let mut out = Sheet::new(target, headers);
        let mut unmatched = 0usize;
        for (r, row) in left.rows().iter().enumerate() {
            self.checkpoint(r)?;
            let mut joined = row.clone();
            match lookup.get(&NormalizedKey::for_join(&row[lk])) {
                Some(&m) => joined.extend(right_cols.iter().map(|&c| right.cell(m, c).clone())),
                None => {
                    unmatched += 1;
                    joined.extend(right_cols.iter().map(|_| CellValue::Empty));
                }
            }
            out.push_row(joined);
        }

        let entry = format!(
            "merged '{}'.'{left_key}' with '{}'.'{right_key}' into '{target}': {} row(s), {unmatched} without a match",
            left.name,
            right.name,
            out.row_count()
        );
        self.log.push(entry);
        self.merges.push(MergeStat { target: target.to_string(), unmatched_count: unmatched });

        self.workbook
            .add_sheet(out)
            .map_err(|e| ExecFailure::SheetExists(e.0))?;
        self.touch(target);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // sort
    // ------------------------------------------------------------------------

    fn sort(&mut self, sheet_name: &str, keys: &[SortKey]) -> Result<(), ExecFailure> {
        let sheet = self.sheet(sheet_name)?;
        let resolved = keys
            .iter()
            .map(|k| column_index(sheet, &k.column).map(|c| (c, k.descending)))
            .collect::<Result<Vec<_>, _>>()?;
        let sheet_name = sheet.name.clone();
        self.checkpoint(0)?;

        if let Some(sheet) = self.workbook.sheet_mut(&sheet_name) {
            sheet.sort_by_columns(&resolved);
        }

        let described: Vec<String> = keys
            .iter()
            .map(|k| format!("'{}' {}", k.column, if k.descending { "descending" } else { "ascending" }))
            .collect();
        self.log.push(format!("sorted '{sheet_name}' by {}", described.join(", ")));
        self.touch(&sheet_name);
        Ok(())
    }
}

/// Header row of a merge result: left headers, then right headers minus the
/// right key. A right header colliding with an earlier one becomes
/// `{right_sheet}_{header}`.
pub fn merged_headers(left: &[String], right_sheet: &str, right: &[String], right_key: usize) -> Vec<String> {
    let mut headers = left.to_vec();
    for (c, name) in right.iter().enumerate() {
        if c == right_key {
            continue;
        }
        if headers.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            headers.push(format!("{right_sheet}_{name}"));
        } else {
            headers.push(name.clone());
        }
    }
    headers
}

fn column_index(sheet: &Sheet, column: &str) -> Result<usize, ExecFailure> {
    sheet.column_index(column).ok_or_else(|| ExecFailure::UnknownColumn {
        sheet: sheet.name.clone(),
        column: column.to_string(),
    })
}

fn month_start(d: chrono::NaiveDate) -> chrono::NaiveDate {
    use chrono::Datelike;
    d.with_day(1).unwrap_or(d)
}

// ============================================================================
// Filter typing and matching
// ============================================================================

/// Reject predicates whose literal cannot be compared with the column.
/// An all-blank column accepts any predicate and simply matches nothing.
pub fn check_filter(predicate: &Predicate, column_kind: ValueKind) -> Result<(), ExecFailure> {
    let invalid = |reason: String| ExecFailure::InvalidFilter {
        column: predicate.column.clone(),
        reason,
    };
    let op = predicate.op;

    match &predicate.value {
        Literal::Text(_) if op.is_ordering() => {
            Err(invalid(format!("'{}' needs a number or date, got text", op.symbol())))
        }
        Literal::Text(_) => Ok(()),
        _ if op == CompareOp::Contains => Err(invalid("'contains' needs a text value".to_string())),
        Literal::Number(_) if !matches!(column_kind, ValueKind::Number | ValueKind::Empty) => {
            Err(invalid(format!("column holds {column_kind} values, compared with a number")))
        }
        Literal::Date(_) if !matches!(column_kind, ValueKind::Date | ValueKind::Empty) => {
            Err(invalid(format!("column holds {column_kind} values, compared with a date")))
        }
        _ => Ok(()),
    }
}

/// Cells that cannot be read as the literal's type never match.
pub fn predicate_matches(predicate: &Predicate, cell: &CellValue) -> bool {
    use std::cmp::Ordering as O;

    let ord = match &predicate.value {
        Literal::Number(n) => match cell.as_number() {
            Some(v) => v.partial_cmp(n),
            None => return false,
        },
        Literal::Date(d) => match cell.as_date() {
            Some(v) => Some(v.cmp(d)),
            None => return false,
        },
        Literal::Text(t) => {
            let hay = cell.display().trim().to_lowercase();
            let needle = t.trim().to_lowercase();
            return match predicate.op {
                CompareOp::Eq => hay == needle,
                CompareOp::NotEq => hay != needle,
                CompareOp::Contains => hay.contains(&needle),
                _ => false,
            };
        }
    };

    let Some(ord) = ord else { return false };
    match predicate.op {
        CompareOp::Eq => ord == O::Equal,
        CompareOp::NotEq => ord != O::Equal,
        CompareOp::Lt => ord == O::Less,
        CompareOp::Lte => ord != O::Greater,
        CompareOp::Gt => ord == O::Greater,
        CompareOp::Gte => ord != O::Less,
        CompareOp::Contains => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.into())
    }

    fn num(n: f64) -> CellValue {
        CellValue::Number(n)
    }

    fn sample() -> Workbook {
        let mut tx = Sheet::new(
            "Transactions",
            vec!["Date".into(), "Category".into(), "Revenue".into(), "Spend".into()],
        );
        let d = |m, day| CellValue::Date(NaiveDate::from_ymd_opt(2024, m, day).unwrap());
        tx.push_row(vec![d(1, 5), text("Ads"), num(100.0), num(40.0)]);
        tx.push_row(vec![d(1, 20), text("Ops"), num(50.0), num(0.0)]);
        tx.push_row(vec![d(2, 3), text("ads"), text("n/a"), num(10.0)]);
        tx.push_row(vec![d(2, 9), text("Ops"), num(-5.0), num(5.0)]);

        let mut camp = Sheet::new(
            "Campaign_Data",
            vec!["Campaign_ID".into(), "Channel".into(), "Spend".into()],
        );
        camp.push_row(vec![text("C1"), text("Email"), num(10.0)]);
        camp.push_row(vec![text("C2"), text("Social"), num(20.0)]);
        camp.push_row(vec![text("C3"), text("Search"), num(30.0)]);

        let mut targets = Sheet::new("Targets", vec!["Metric_Name".into(), "Value".into()]);
        targets.push_row(vec![text("Revenue"), num(1000.0)]);
        targets.push_row(vec![text("CPA"), num(25.0)]);

        Workbook::from_sheets(vec![tx, camp, targets]).unwrap()
    }

    fn run(wb: &Workbook, ops: Vec<Operation>) -> Result<Execution, ExecError> {
        execute(wb, &TransformationPlan::new(ops, Vec::new()), &CancelToken::new())
    }

    fn margin() -> Operation {
        Operation::AddColumn {
            sheet: "Transactions".into(),
            name: "Profit_Margin".into(),
            expr: DerivedExpr::Ratio { numerator: "Revenue".into(), denominator: "Spend".into() },
        }
    }

    #[test]
    fn identity_plan_preserves_structure() {
        let wb = sample();
        let out = execute(&wb, &TransformationPlan::identity(), &CancelToken::new()).unwrap();
        assert_eq!(out.workbook.fingerprint(), wb.fingerprint());
        assert!(out.sheets.is_empty());
        assert!(out.log.is_empty());
    }

    #[test]
    fn add_column_coerces_and_logs() {
        let wb = sample();
        let out = run(&wb, vec![margin()]).unwrap();
        let tx = out.workbook.sheet("Transactions").unwrap();
        let c = tx.column_index("Profit_Margin").unwrap();
        assert_eq!(tx.cell(0, c), &num(2.5));
        // zero denominator
        assert_eq!(tx.cell(1, c), &CellValue::Empty);
        // "n/a" revenue coerced to 0
        assert_eq!(tx.cell(2, c), &num(0.0));
        assert_eq!(out.coerced_cells, 1);
        assert!(out.log[0].contains("1 non-numeric or missing source value(s) treated as 0"));
        assert!(out.log[0].contains("zero denominator"));

        // source untouched
        assert!(!wb.sheet("Transactions").unwrap().has_column("Profit_Margin"));
    }

    #[test]
    fn add_column_rejects_existing_name() {
        let err = run(&sample(), vec![margin(), margin()]).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.kind, OperationKind::AddColumn);
        assert!(matches!(err.failure, ExecFailure::ColumnExists { .. }));
    }

    #[test]
    fn month_start_buckets_dates() {
        let op = Operation::AddColumn {
            sheet: "Transactions".into(),
            name: "Month".into(),
            expr: DerivedExpr::MonthStart { column: "Date".into() },
        };
        let out = run(&sample(), vec![op]).unwrap();
        let tx = out.workbook.sheet("Transactions").unwrap();
        let c = tx.column_index("Month").unwrap();
        assert_eq!(tx.cell(1, c), &CellValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert_eq!(tx.cell(3, c), &CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
    }

    #[test]
    fn share_is_percent_of_column_total() {
        let op = Operation::AddColumn {
            sheet: "Campaign_Data".into(),
            name: "Spend_Percentage".into(),
            expr: DerivedExpr::Share { column: "Spend".into() },
        };
        let out = run(&sample(), vec![op]).unwrap();
        let camp = out.workbook.sheet("Campaign_Data").unwrap();
        let c = camp.column_index("Spend_Percentage").unwrap();
        assert_eq!(camp.cell(0, c), &num(16.67));
        assert_eq!(camp.cell(1, c), &num(33.33));
        assert_eq!(camp.cell(2, c), &num(50.0));
        assert_eq!(out.coerced_cells, 0);
    }

    #[test]
    fn share_of_zero_total_is_blank() {
        let mut wb = sample();
        let zeros = Operation::AddColumn {
            sheet: "Transactions".into(),
            name: "Zero".into(),
            expr: DerivedExpr::Difference { left: "Spend".into(), right: "Spend".into() },
        };
        wb = run(&wb, vec![zeros]).unwrap().workbook;
        let op = Operation::AddColumn {
            sheet: "Transactions".into(),
            name: "Zero_Percentage".into(),
            expr: DerivedExpr::Share { column: "Zero".into() },
        };
        let out = run(&wb, vec![op]).unwrap();
        let tx = out.workbook.sheet("Transactions").unwrap();
        let c = tx.column_index("Zero_Percentage").unwrap();
        assert!(tx.column(c).all(|v| v == &CellValue::Empty));
        assert!(out.log[0].contains("4 row(s) with a column total of zero left blank"));
    }

    #[test]
    fn not_empty_filter_drops_blank_cells() {
        let mut wb = sample();
        if let Some(tx) = wb.sheet_mut("Transactions") {
            tx.push_row(vec![CellValue::Empty, CellValue::Empty, num(1.0), num(1.0)]);
            tx.push_row(vec![CellValue::Empty, text("  "), num(2.0), num(1.0)]);
        }
        let op = Operation::Filter { sheet: "Transactions".into(), predicate: Predicate::not_empty("Category") };
        let out = run(&wb, vec![op]).unwrap();
        assert_eq!(out.workbook.sheet("Transactions").unwrap().row_count(), 4);
        assert!(out.log[0].contains("'Category' is not empty"), "{}", out.log[0]);
    }

    #[test]
    fn filter_keeps_matching_rows() {
        let op = Operation::Filter {
            sheet: "Transactions".into(),
            predicate: Predicate { column: "Spend".into(), op: CompareOp::Gt, value: Literal::Number(0.0) },
        };
        let out = run(&sample(), vec![op]).unwrap();
        assert_eq!(out.workbook.sheet("Transactions").unwrap().row_count(), 3);
        assert_eq!(
            out.sheets,
            vec![RowDelta { sheet: "Transactions".into(), before: Some(4), after: 3 }]
        );
    }

    #[test]
    fn filter_text_equality_ignores_case() {
        let op = Operation::Filter {
            sheet: "Transactions".into(),
            predicate: Predicate { column: "Category".into(), op: CompareOp::Eq, value: Literal::Text("ADS".into()) },
        };
        let out = run(&sample(), vec![op]).unwrap();
        assert_eq!(out.workbook.sheet("Transactions").unwrap().row_count(), 2);
    }

    #[test]
    fn filter_type_mismatch_is_invalid() {
        let ordering_on_text = Operation::Filter {
            sheet: "Transactions".into(),
            predicate: Predicate { column: "Category".into(), op: CompareOp::Gt, value: Literal::Text("A".into()) },
        };
        let number_on_text = Operation::Filter {
            sheet: "Transactions".into(),
            predicate: Predicate { column: "Category".into(), op: CompareOp::Eq, value: Literal::Number(1.0) },
        };
        let date_on_number = Operation::Filter {
            sheet: "Transactions".into(),
            predicate: Predicate {
                column: "Spend".into(),
                op: CompareOp::Lt,
                value: Literal::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            },
        };
        for op in [ordering_on_text, number_on_text, date_on_number] {
            let err = run(&sample(), vec![op]).unwrap_err();
            assert!(matches!(err.failure, ExecFailure::InvalidFilter { .. }), "{err}");
        }
    }

    #[test]
    fn aggregate_writes_new_sheet_in_first_seen_order() {
        let op = Operation::Aggregate {
            sheet: "Transactions".into(),
            group_by: "Category".into(),
            value_column: "Spend".into(),
            function: AggregateFn::Sum,
            target: "Category_Summary".into(),
        };
        let out = run(&sample(), vec![op]).unwrap();
        let summary = out.workbook.sheet("Category_Summary").unwrap();
        assert_eq!(summary.headers(), ["Category".to_string(), "Spend_sum".to_string()]);
        assert_eq!(summary.rows()[0], vec![text("Ads"), num(50.0)]);
        assert_eq!(summary.rows()[1], vec![text("Ops"), num(5.0)]);
        assert_eq!(out.sheets[0].before, None);
        // input sheet untouched
        assert_eq!(out.workbook.sheet("Transactions").unwrap().row_count(), 4);
    }

    #[test]
    fn aggregate_never_overwrites() {
        let op = Operation::Aggregate {
            sheet: "Transactions".into(),
            group_by: "Category".into(),
            value_column: "Spend".into(),
            function: AggregateFn::Count,
            target: "Targets".into(),
        };
        let err = run(&sample(), vec![op]).unwrap_err();
        assert_eq!(err.failure, ExecFailure::SheetExists("Targets".into()));
    }

    #[test]
    fn merge_without_matches_null_fills() {
        let op = Operation::Merge {
            left: "Campaign_Data".into(),
            right: "Targets".into(),
            left_key: "Campaign_ID".into(),
            right_key: "Metric_Name".into(),
            target: "Campaign_Data_Targets".into(),
        };
        let out = run(&sample(), vec![op]).unwrap();
        let joined = out.workbook.sheet("Campaign_Data_Targets").unwrap();
        assert_eq!(joined.row_count(), 3);
        let value = joined.column_index("Value").unwrap();
        assert!(joined.column(value).all(|v| v == &CellValue::Empty));
        assert_eq!(
            out.merges,
            vec![MergeStat { target: "Campaign_Data_Targets".into(), unmatched_count: 3 }]
        );
    }

    #[test]
    fn merge_renames_colliding_columns() {
        let op = Operation::Merge {
            left: "Transactions".into(),
            right: "Campaign_Data".into(),
            left_key: "Category".into(),
            right_key: "Channel".into(),
            target: "Joined".into(),
        };
        let out = run(&sample(), vec![op]).unwrap();
        let joined = out.workbook.sheet("Joined").unwrap();
        assert!(joined.has_column("Campaign_Data_Spend"));
        assert!(!joined.has_column("Channel"));
    }

    #[test]
    fn sort_descending_dates() {
        let op = Operation::Sort {
            sheet: "Transactions".into(),
            keys: vec![SortKey { column: "Date".into(), descending: true }],
        };
        let out = run(&sample(), vec![op]).unwrap();
        let tx = out.workbook.sheet("Transactions").unwrap();
        assert_eq!(tx.cell(0, 0), &CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 9).unwrap()));
    }

    #[test]
    fn unknown_column_reports_index() {
        let op = Operation::Sort {
            sheet: "Transactions".into(),
            keys: vec![SortKey { column: "Nope".into(), descending: false }],
        };
        let err = run(&sample(), vec![margin(), op]).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.column(), Some("Nope"));
    }

    #[test]
    fn execution_is_idempotent() {
        let wb = sample();
        let ops = vec![
            margin(),
            Operation::Sort {
                sheet: "Transactions".into(),
                keys: vec![SortKey { column: "Profit_Margin".into(), descending: true }],
            },
        ];
        let a = run(&wb, ops.clone()).unwrap();
        let b = run(&wb, ops).unwrap();
        assert_eq!(a.workbook.fingerprint(), b.workbook.fingerprint());
        assert_eq!(a.sheets, b.sheets);
    }

    #[test]
    fn cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = execute(&sample(), &TransformationPlan::new(vec![margin()], Vec::new()), &cancel)
            .unwrap_err();
        assert_eq!(err.failure, ExecFailure::Cancelled);
        assert_eq!(err.index, 0);
    }

    #[test]
    fn plan_notes_lead_the_log() {
        let plan = TransformationPlan::new(vec![margin()], vec!["'revenue' matched 'Revenue'".into()]);
        let out = execute(&sample(), &plan, &CancelToken::new()).unwrap();
        assert_eq!(out.log[0], "'revenue' matched 'Revenue'");
        assert_eq!(out.log.len(), 2);
    }
}
