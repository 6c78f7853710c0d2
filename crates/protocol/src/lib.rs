//! Sheetwright Protocol: v1 frozen wire format
//!
//! This crate defines the canonical types exchanged between a caller and the
//! sheetwright core: clarifying questions, answers, conversation replies,
//! transformation operations and plans, artifact summaries, and errors.
//!
//! # Protocol Version
//!
//! This is **protocol v1**; the wire format is frozen. Changes require:
//! 1. Version bump in PROTOCOL_VERSION
//! 2. New golden vectors in `tests/golden.rs`
//! 3. Backward compatibility handling
//!
//! # Usage
//!
//! ```ignore
//! use sheetwright_protocol::{Answer, Turn, Reply};
//!
//! let turn = Turn { step: 1, answer: Answer::YesNo(true) };
//! let json = serde_json::to_string(&turn)?;
//! let reply: Reply = serde_json::from_str(&line)?;
//! ```

mod ops;

pub use ops::{
    AggregateFn, CompareOp, DerivedExpr, Literal, Operation, OperationKind, Predicate, SortKey,
    TransformationPlan, FALLBACK_MESSAGE,
};

use serde::{Deserialize, Serialize};

/// Current protocol version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Questions
// =============================================================================

/// A clarifying question emitted by the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Stable identifier, derived from the analysis (never random).
    pub id: String,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// Closed set of question shapes. Each variant fixes its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice { options: Vec<ChoiceOption> },
    YesNo,
    FreeText,
}

impl QuestionKind {
    pub fn name(&self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice { .. } => "multiple_choice",
            QuestionKind::YesNo => "yes_no",
            QuestionKind::FreeText => "free_text",
        }
    }
}

/// One selectable option of a multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
}

// =============================================================================
// Answers
// =============================================================================

/// A caller's answer. The variant must fit the current question's kind;
/// free text is accepted everywhere and classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    /// Option id of a multiple-choice question.
    Choice(String),
    YesNo(bool),
    FreeText(String),
}

/// An answer tagged with the step it responds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub step: u64,
    pub answer: Answer,
}

// =============================================================================
// Replies
// =============================================================================

/// Response to StartOrContinueConversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    /// The next (or re-prompted) question. Answer it with `step`.
    Question {
        step: u64,
        question: Question,
        #[serde(skip_serializing_if = "Option::is_none")]
        notice: Option<String>,
    },
    /// All requirements collected; call Finalize.
    ReadyToCompile {
        step: u64,
        summary: RequirementSummary,
    },
    /// Retry cap exhausted; Finalize will apply no changes.
    Fallback { step: u64, message: String },
    /// The conversation timed out or was cancelled.
    Abandoned { handle: String },
}

/// What the conversation collected, for display before Finalize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementSummary {
    pub answered: usize,
    /// Template ids matched from free text, in step order.
    pub intents: Vec<String>,
}

// =============================================================================
// Artifacts
// =============================================================================

/// Row counts of one sheet before and after execution.
/// `before` is None for sheets created by the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDelta {
    pub sheet: String,
    pub before: Option<usize>,
    pub after: usize,
}

/// Outcome of one merge operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStat {
    pub target: String,
    pub unmatched_count: usize,
}

/// Result of Finalize: where to download, and what was done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub handle: String,
    pub expires_at: String, // ISO 8601 format
    pub digest: String,
    pub size_bytes: usize,
    pub log: Vec<String>,
    pub sheets: Vec<RowDelta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merges: Vec<MergeStat>,
    pub coerced_cells: usize,
}

/// Full Finalize response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finalized {
    pub plan: TransformationPlan,
    pub artifact: ArtifactSummary,
}

// =============================================================================
// Errors
// =============================================================================

/// Error taxonomy visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidWorkbook,
    EmptyDataset,
    StaleConversationStep,
    UnknownColumn,
    UnknownSheet,
    InvalidFilter,
    ClassificationTimeout,
    ExecutionAborted,
    ArtifactExpired,
    ArtifactUnavailable,
    UnknownHandle,
    Unanalyzed,
    ConversationActive,
    NotReadyToCompile,
    InvalidAnswer,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidWorkbook => "invalid_workbook",
            ErrorKind::EmptyDataset => "empty_dataset",
            ErrorKind::StaleConversationStep => "stale_conversation_step",
            ErrorKind::UnknownColumn => "unknown_column",
            ErrorKind::UnknownSheet => "unknown_sheet",
            ErrorKind::InvalidFilter => "invalid_filter",
            ErrorKind::ClassificationTimeout => "classification_timeout",
            ErrorKind::ExecutionAborted => "execution_aborted",
            ErrorKind::ArtifactExpired => "artifact_expired",
            ErrorKind::ArtifactUnavailable => "artifact_unavailable",
            ErrorKind::UnknownHandle => "unknown_handle",
            ErrorKind::Unanalyzed => "unanalyzed",
            ErrorKind::ConversationActive => "conversation_active",
            ErrorKind::NotReadyToCompile => "not_ready_to_compile",
            ErrorKind::InvalidAnswer => "invalid_answer",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}
