use serde::{Deserialize, Serialize};
use sheetwright_protocol::{Answer, Operation, RequirementSummary};

/// One accepted conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    /// A structured answer to a generated question.
    Answered { question_id: String, answer: Answer },
    /// Free text classified onto a template; carries the template's
    /// operations as synthesized at classification time.
    Intent { utterance: String, template_id: String, operations: Vec<Operation> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementEntry {
    pub step: u64,
    #[serde(flatten)]
    pub requirement: Requirement,
}

/// Accepted answers in step order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementSet {
    entries: Vec<RequirementEntry>,
}

impl RequirementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: u64, requirement: Requirement) {
        debug_assert!(self.entries.last().map_or(true, |e| e.step < step));
        self.entries.push(RequirementEntry { step, requirement });
    }

    pub fn entries(&self) -> &[RequirementEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Answer count plus the template id each free-text intent resolved to.
    pub fn summary(&self) -> RequirementSummary {
        RequirementSummary {
            answered: self
                .entries
                .iter()
                .filter(|e| matches!(e.requirement, Requirement::Answered { .. }))
                .count(),
            intents: self
                .entries
                .iter()
                .filter_map(|e| match &e.requirement {
                    Requirement::Intent { template_id, .. } => Some(template_id.clone()),
                    _ => None,
                })
                .collect(),
        }
    }
}
