//! Requirement compiler.
//!
//! Pure function of (requirement set, analysis snapshot, options). Walks the
//! accepted turns in step order, expands them into operations, resolves
//! every sheet and column reference against a simulated schema (so later
//! operations can use columns and sheets created by earlier ones), and
//! validates filter types. Never reads the live workbook.
//!
//! A new column or sheet whose name is taken gets a `_2` suffix. Later
//! operations from the same answer were written against the original name,
//! so they follow the rename.

use sheetwright_engine::exec::{check_filter, merged_headers, ExecFailure};
use sheetwright_engine::ValueKind;
use sheetwright_protocol::{Answer, Operation, TransformationPlan};

use crate::error::CompileError;
use crate::fuzzy::{resolve, Resolved};
use crate::model::AnalysisResult;
use crate::questions::{generate, Binding};
use crate::requirements::{Requirement, RequirementSet};
use crate::text::unique_name;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompileOptions {
    /// Minimum Jaro-Winkler similarity for a fuzzy column/sheet match.
    pub fuzzy_threshold: f64,
    /// Must match the question cap the conversation ran with.
    pub max_questions: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { fuzzy_threshold: 0.85, max_questions: 8 }
    }
}

pub fn compile(
    requirements: &RequirementSet,
    analysis: &AnalysisResult,
    options: &CompileOptions,
) -> Result<TransformationPlan, CompileError> {
    let requested = expand(requirements, analysis, options)?;

    let mut schema = SimSchema::from_analysis(analysis);
    let mut notes = Vec::new();
    let mut seen: Vec<(Operation, Option<Rename>)> = Vec::new();
    let mut plan: Vec<Operation> = Vec::new();

    for group in requested {
        let mut renames: Vec<Rename> = Vec::new();
        for op in group {
            let mut ctx = Ctx {
                schema: &mut schema,
                notes: &mut notes,
                renames: &renames,
                threshold: options.fuzzy_threshold,
            };
            let mut op = ctx.resolve(op)?;

            // Asking twice for the same thing applies it once
            if let Some((_, earlier)) = seen.iter().find(|(o, _)| *o == op) {
                renames.extend(earlier.clone());
                continue;
            }
            let requested = op.clone();

            let rename = ctx.apply(&mut op, plan.len())?;
            renames.extend(rename.clone());
            seen.push((requested, rename));
            plan.push(op);
        }
    }

    log::debug!("compiled {} operation(s), {} note(s)", plan.len(), notes.len());
    Ok(TransformationPlan::new(plan, notes))
}

/// Turn accepted answers into raw operations, one group per answer, in
/// step order.
fn expand(
    requirements: &RequirementSet,
    analysis: &AnalysisResult,
    options: &CompileOptions,
) -> Result<Vec<Vec<Operation>>, CompileError> {
    let questions = generate(analysis, options.max_questions);
    let template_ops = |id: &str| -> Result<Vec<Operation>, CompileError> {
        analysis
            .template(id)
            .map(|t| t.operations.clone())
            .ok_or_else(|| CompileError::UnknownQuestion { id: id.to_string() })
    };

    let mut out = Vec::new();
    for entry in requirements.entries() {
        let mut group = Vec::new();
        match &entry.requirement {
            Requirement::Answered { question_id, answer } => {
                let question = questions
                    .iter()
                    .find(|q| q.question.id == *question_id)
                    .ok_or_else(|| CompileError::UnknownQuestion { id: question_id.clone() })?;

                match (&question.binding, answer) {
                    (Binding::Confirm { template_id }, Answer::YesNo(true)) => {
                        group.extend(template_ops(template_id)?);
                    }
                    (Binding::Choose { .. }, Answer::Choice(option)) => {
                        match question.option_template(option) {
                            Some(Some(template_id)) => group.extend(template_ops(template_id)?),
                            Some(None) => {}
                            None => {
                                return Err(CompileError::UnknownOption {
                                    question: question_id.clone(),
                                    option: option.clone(),
                                })
                            }
                        }
                    }
                    // "no", open-question text, or a variant the question ignores
                    _ => {}
                }
            }
            Requirement::Intent { operations, .. } => group.extend(operations.iter().cloned()),
        }
        if !group.is_empty() {
            out.push(group);
        }
    }
    Ok(out)
}

// ============================================================================
// Simulated schema
// ============================================================================

#[derive(Debug, Clone)]
struct SimSheet {
    name: String,
    columns: Vec<(String, ValueKind)>,
}

impl SimSheet {
    fn kind_of(&self, column: &str) -> ValueKind {
        self.columns.iter().find(|(n, _)| n == column).map(|(_, k)| *k).unwrap_or(ValueKind::Empty)
    }

    fn has(&self, column: &str) -> bool {
        self.columns.iter().any(|(n, _)| n.eq_ignore_ascii_case(column))
    }

    fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }
}

#[derive(Debug, Clone)]
struct SimSchema {
    sheets: Vec<SimSheet>,
}

impl SimSchema {
    fn from_analysis(analysis: &AnalysisResult) -> Self {
        Self {
            sheets: analysis
                .sheets
                .iter()
                .map(|s| SimSheet {
                    name: s.name.clone(),
                    columns: s.columns.iter().map(|c| (c.name.clone(), c.kind)).collect(),
                })
                .collect(),
        }
    }

    fn sheet(&self, name: &str) -> Option<&SimSheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    fn sheet_mut(&mut self, name: &str) -> Option<&mut SimSheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    fn has_sheet(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// A created column or sheet that had to take a fresh name.
#[derive(Debug, Clone, PartialEq)]
enum Rename {
    Column { sheet: String, from: String, to: String },
    Sheet { from: String, to: String },
}

// ============================================================================
// Resolution
// ============================================================================

struct Ctx<'a> {
    schema: &'a mut SimSchema,
    notes: &'a mut Vec<String>,
    /// Renames made earlier in the current answer's operations.
    renames: &'a [Rename],
    threshold: f64,
}

impl Ctx<'_> {
    fn follow_sheet(&self, name: &mut String) {
        let latest = self.renames.iter().rev().find_map(|r| match r {
            Rename::Sheet { from, to } if from == name => Some(to),
            _ => None,
        });
        if let Some(to) = latest {
            *name = to.clone();
        }
    }

    fn follow_column(&self, sheet: &str, column: &mut String) {
        let latest = self.renames.iter().rev().find_map(|r| match r {
            Rename::Column { sheet: s, from, to } if s == sheet && from == column => Some(to),
            _ => None,
        });
        if let Some(to) = latest {
            *column = to.clone();
        }
    }

    fn resolve_sheet(&mut self, name: &mut String) -> Result<(), CompileError> {
        self.follow_sheet(name);
        let names: Vec<&str> = self.schema.sheets.iter().map(|s| s.name.as_str()).collect();
        match resolve(name, names, self.threshold) {
            Resolved::Exact(_) => Ok(()),
            Resolved::Corrected(actual) => {
                log::info!("sheet '{name}' resolved to '{actual}'");
                self.notes.push(format!("sheet '{name}' matched '{actual}'"));
                *name = actual;
                Ok(())
            }
            Resolved::Missing { .. } => Err(CompileError::UnknownSheet { sheet: name.clone() }),
        }
    }

    fn resolve_column(&mut self, sheet: &str, column: &mut String) -> Result<(), CompileError> {
        self.follow_column(sheet, column);
        let names = self.schema.sheet(sheet).map(SimSheet::names).unwrap_or_default();
        match resolve(column, names.iter().map(String::as_str), self.threshold) {
            Resolved::Exact(_) => Ok(()),
            Resolved::Corrected(actual) => {
                log::info!("column '{column}' in '{sheet}' resolved to '{actual}'");
                self.notes.push(format!("column '{column}' in '{sheet}' matched '{actual}'"));
                *column = actual;
                Ok(())
            }
            Resolved::Missing { suggestions } => Err(CompileError::UnknownColumn {
                sheet: sheet.to_string(),
                column: column.clone(),
                suggestions,
            }),
        }
    }

    /// Resolve every sheet and column reference in place.
    fn resolve(&mut self, mut op: Operation) -> Result<Operation, CompileError> {
        match &mut op {
            Operation::AddColumn { sheet, expr, .. } => {
                self.resolve_sheet(sheet)?;
                for column in expr.columns_mut() {
                    self.resolve_column(sheet, column)?;
                }
            }
            Operation::Filter { sheet, predicate } => {
                self.resolve_sheet(sheet)?;
                self.resolve_column(sheet, &mut predicate.column)?;
            }
            Operation::Aggregate { sheet, group_by, value_column, .. } => {
                self.resolve_sheet(sheet)?;
                self.resolve_column(sheet, group_by)?;
                self.resolve_column(sheet, value_column)?;
            }
            Operation::Merge { left, right, left_key, right_key, .. } => {
                self.resolve_sheet(left)?;
                self.resolve_sheet(right)?;
                self.resolve_column(left, left_key)?;
                self.resolve_column(right, right_key)?;
            }
            Operation::Sort { sheet, keys } => {
                self.resolve_sheet(sheet)?;
                for key in keys {
                    self.resolve_column(sheet, &mut key.column)?;
                }
            }
        }
        Ok(op)
    }

    /// Validate, rename colliding outputs, and record the operation's
    /// effect on the simulated schema.
    fn apply(&mut self, op: &mut Operation, index: usize) -> Result<Option<Rename>, CompileError> {
        let mut rename = None;
        match op {
            Operation::AddColumn { sheet, name, expr } => {
                let Some(sim) = self.schema.sheet_mut(sheet) else {
                    return Err(CompileError::UnknownSheet { sheet: sheet.clone() });
                };
                let fresh = unique_name(name, |n| sim.has(n));
                if fresh != *name {
                    self.notes.push(format!("column '{name}' already exists in '{sheet}'; added as '{fresh}'"));
                    rename = Some(Rename::Column { sheet: sheet.clone(), from: name.clone(), to: fresh.clone() });
                    *name = fresh;
                }
                let kind = if expr.yields_date() { ValueKind::Date } else { ValueKind::Number };
                sim.columns.push((name.clone(), kind));
            }
            Operation::Filter { sheet, predicate } => {
                let kind = self.schema.sheet(sheet).map(|s| s.kind_of(&predicate.column)).unwrap_or(ValueKind::Empty);
                check_filter(predicate, kind).map_err(|failure| match failure {
                    ExecFailure::InvalidFilter { column, reason } => CompileError::InvalidFilter { index, column, reason },
                    other => CompileError::InvalidFilter {
                        index,
                        column: predicate.column.clone(),
                        reason: other.to_string(),
                    },
                })?;
            }
            Operation::Aggregate { sheet, group_by, value_column, function, target } => {
                let group_kind = self.schema.sheet(sheet).map(|s| s.kind_of(group_by)).unwrap_or(ValueKind::Text);
                rename = self.fresh_target(target);
                self.schema.sheets.push(SimSheet {
                    name: target.clone(),
                    columns: vec![
                        (group_by.clone(), group_kind),
                        (format!("{value_column}_{function}"), ValueKind::Number),
                    ],
                });
            }
            Operation::Merge { left, right, right_key, target, .. } => {
                let Some(l) = self.schema.sheet(left) else {
                    return Err(CompileError::UnknownSheet { sheet: left.clone() });
                };
                let Some(r) = self.schema.sheet(right) else {
                    return Err(CompileError::UnknownSheet { sheet: right.clone() });
                };
                let rk = r.columns.iter().position(|(n, _)| n == right_key).unwrap_or(usize::MAX);
                let left_names = l.names();
                let right_names = r.names();
                let kinds: Vec<ValueKind> = l
                    .columns
                    .iter()
                    .map(|(_, k)| *k)
                    .chain(r.columns.iter().enumerate().filter(|(i, _)| *i != rk).map(|(_, (_, k))| *k))
                    .collect();
                let headers = merged_headers(&left_names, &r.name, &right_names, rk);

                rename = self.fresh_target(target);
                self.schema.sheets.push(SimSheet {
                    name: target.clone(),
                    columns: headers.into_iter().zip(kinds).collect(),
                });
            }
            Operation::Sort { .. } => {}
        }
        Ok(rename)
    }

    fn fresh_target(&mut self, target: &mut String) -> Option<Rename> {
        let fresh = unique_name(target, |n| self.schema.has_sheet(n));
        if fresh == *target {
            return None;
        }
        self.notes.push(format!("sheet '{target}' already exists; wrote '{fresh}' instead"));
        let rename = Rename::Sheet { from: target.clone(), to: fresh.clone() };
        *target = fresh;
        Some(rename)
    }
}
