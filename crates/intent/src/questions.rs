//! Deterministic question generation.
//!
//! Questions come from the analysis templates in a fixed order: derived
//! columns, summaries, filters, sorts, merges, then one closing free-text
//! prompt. The same analysis always yields the same list.

use sheetwright_protocol::{ChoiceOption, Question, QuestionKind};

use crate::model::{AnalysisResult, Template, TemplateGroup};

/// Id of the closing free-text question.
pub const OPEN_QUESTION_ID: &str = "anything_else";

/// Option id meaning "none of these".
pub const NONE_OPTION: &str = "none";

/// How an answer to a question maps back onto templates.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Yes applies the template.
    Confirm { template_id: String },
    /// Each option applies one template, or nothing.
    Choose { options: Vec<(String, Option<String>)> },
    /// Free text, classified against all templates.
    Open,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuestion {
    pub question: Question,
    pub binding: Binding,
}

impl GeneratedQuestion {
    /// Template applied by a choice option; outer `None` when the option is
    /// not offered.
    pub fn option_template(&self, option_id: &str) -> Option<Option<&str>> {
        match &self.binding {
            Binding::Choose { options } => {
                options.iter().find(|(id, _)| id == option_id).map(|(_, t)| t.as_deref())
            }
            _ => None,
        }
    }
}

const GROUP_ORDER: &[TemplateGroup] = &[
    TemplateGroup::Derive,
    TemplateGroup::Summarize,
    TemplateGroup::Filter,
    TemplateGroup::Sort,
    TemplateGroup::Merge,
];

/// Generate the question list. Empty when there is nothing to ask.
pub fn generate(analysis: &AnalysisResult, max_questions: usize) -> Vec<GeneratedQuestion> {
    if analysis.templates.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for group in GROUP_ORDER {
        let templates: Vec<&Template> = analysis.templates.iter().filter(|t| t.group == *group).collect();
        match group {
            TemplateGroup::Summarize | TemplateGroup::Sort => {
                for sheet in &analysis.sheets {
                    let for_sheet: Vec<&Template> =
                        templates.iter().copied().filter(|t| t.sheet == sheet.name).collect();
                    if !for_sheet.is_empty() {
                        out.push(choice_question(*group, &sheet.name, &for_sheet));
                    }
                }
            }
            _ => out.extend(templates.into_iter().map(confirm_question)),
        }
    }
    out.truncate(max_questions);

    out.push(GeneratedQuestion {
        question: Question {
            id: OPEN_QUESTION_ID.to_string(),
            prompt: "Anything else? Describe it in your own words, or say 'done'.".to_string(),
            kind: QuestionKind::FreeText,
        },
        binding: Binding::Open,
    });
    out
}

fn confirm_question(template: &Template) -> GeneratedQuestion {
    GeneratedQuestion {
        question: Question {
            id: template.id.clone(),
            prompt: format!("{}?", template.summary),
            kind: QuestionKind::YesNo,
        },
        binding: Binding::Confirm { template_id: template.id.clone() },
    }
}

fn choice_question(group: TemplateGroup, sheet: &str, templates: &[&Template]) -> GeneratedQuestion {
    let (id, prompt, none_label) = match group {
        TemplateGroup::Sort => (
            format!("sort:{sheet}"),
            format!("How should '{sheet}' be ordered?"),
            "Keep current order",
        ),
        _ => (
            format!("summarize:{sheet}"),
            format!("Which summary of '{sheet}' would help?"),
            "No summary",
        ),
    };

    let mut options: Vec<ChoiceOption> = Vec::with_capacity(templates.len() + 1);
    let mut bindings = Vec::with_capacity(templates.len() + 1);
    for (i, template) in templates.iter().enumerate() {
        let option_id = format!("option_{}", i + 1);
        options.push(ChoiceOption { id: option_id.clone(), label: template.summary.clone() });
        bindings.push((option_id, Some(template.id.clone())));
    }
    options.push(ChoiceOption { id: NONE_OPTION.to_string(), label: none_label.to_string() });
    bindings.push((NONE_OPTION.to_string(), None));

    GeneratedQuestion {
        question: Question { id, prompt, kind: QuestionKind::MultipleChoice { options } },
        binding: Binding::Choose { options: bindings },
    }
}
