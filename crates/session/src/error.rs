// Core error taxonomy and its wire rendering

use sheetwright_engine::{ExecError, ExecFailure};
use sheetwright_intent::CompileError;
use sheetwright_protocol::{ErrorBody, ErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    InvalidWorkbook(String),
    EmptyDataset,
    /// `expected` is 0 when no conversation is running.
    StaleConversationStep { expected: u64, got: u64 },
    Compile(CompileError),
    Execution(ExecError),
    ArtifactExpired(String),
    ArtifactUnavailable(String),
    UnknownHandle(String),
    Unanalyzed(String),
    ConversationActive(String),
    NotReadyToCompile(String),
    InvalidAnswer(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidWorkbook(_) => ErrorKind::InvalidWorkbook,
            CoreError::EmptyDataset => ErrorKind::EmptyDataset,
            CoreError::StaleConversationStep { .. } => ErrorKind::StaleConversationStep,
            CoreError::Compile(e) => match e {
                CompileError::UnknownColumn { .. } => ErrorKind::UnknownColumn,
                CompileError::UnknownSheet { .. } => ErrorKind::UnknownSheet,
                CompileError::InvalidFilter { .. } => ErrorKind::InvalidFilter,
                CompileError::UnknownQuestion { .. } | CompileError::UnknownOption { .. } => {
                    ErrorKind::InvalidAnswer
                }
            },
            CoreError::Execution(e) => match e.failure {
                ExecFailure::UnknownColumn { .. } => ErrorKind::UnknownColumn,
                ExecFailure::UnknownSheet(_) => ErrorKind::UnknownSheet,
                ExecFailure::InvalidFilter { .. } => ErrorKind::InvalidFilter,
                ExecFailure::ColumnExists { .. } | ExecFailure::SheetExists(_) | ExecFailure::Cancelled => {
                    ErrorKind::ExecutionAborted
                }
            },
            CoreError::ArtifactExpired(_) => ErrorKind::ArtifactExpired,
            CoreError::ArtifactUnavailable(_) => ErrorKind::ArtifactUnavailable,
            CoreError::UnknownHandle(_) => ErrorKind::UnknownHandle,
            CoreError::Unanalyzed(_) => ErrorKind::Unanalyzed,
            CoreError::ConversationActive(_) => ErrorKind::ConversationActive,
            CoreError::NotReadyToCompile(_) => ErrorKind::NotReadyToCompile,
            CoreError::InvalidAnswer(_) => ErrorKind::InvalidAnswer,
        }
    }

    pub fn operation_index(&self) -> Option<usize> {
        match self {
            CoreError::Compile(CompileError::InvalidFilter { index, .. }) => Some(*index),
            CoreError::Execution(e) => Some(e.index),
            _ => None,
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            CoreError::Compile(e) => e.column(),
            CoreError::Execution(e) => e.column(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Execution(ExecError { failure: ExecFailure::Cancelled, .. }))
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            operation_index: self.operation_index(),
            column: self.column().map(str::to_string),
        }
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidWorkbook(msg) => write!(f, "Not a readable workbook: {}", msg),
            CoreError::EmptyDataset => write!(f, "Every sheet is empty; nothing to analyze"),
            CoreError::StaleConversationStep { expected: 0, got } => {
                write!(f, "No conversation is running; answer for step {} rejected", got)
            }
            CoreError::StaleConversationStep { expected, got } => {
                write!(f, "Answer for step {} rejected; current step is {}", got, expected)
            }
            CoreError::Compile(e) => write!(f, "Could not compile plan: {}", e),
            CoreError::Execution(e) => write!(f, "Execution aborted at {}", e),
            CoreError::ArtifactExpired(handle) => write!(f, "Artifact {} has expired", handle),
            CoreError::ArtifactUnavailable(msg) => write!(f, "Artifact unavailable: {}", msg),
            CoreError::UnknownHandle(handle) => write!(f, "Unknown handle {}", handle),
            CoreError::Unanalyzed(handle) => {
                write!(f, "Workbook {} has not been analyzed yet", handle)
            }
            CoreError::ConversationActive(handle) => {
                write!(f, "A conversation is already active on {}", handle)
            }
            CoreError::NotReadyToCompile(msg) => write!(f, "Not ready to compile: {}", msg),
            CoreError::InvalidAnswer(msg) => write!(f, "Invalid answer: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<CompileError> for CoreError {
    fn from(e: CompileError) -> Self {
        CoreError::Compile(e)
    }
}

impl From<ExecError> for CoreError {
    fn from(e: ExecError) -> Self {
        CoreError::Execution(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetwright_protocol::OperationKind;

    #[test]
    fn execution_errors_carry_index_and_column() {
        let err = CoreError::from(ExecError {
            index: 2,
            kind: OperationKind::Filter,
            failure: ExecFailure::InvalidFilter { column: "Spend".into(), reason: "text".into() },
        });
        let body = err.to_body();
        assert_eq!(body.kind, ErrorKind::InvalidFilter);
        assert_eq!(body.operation_index, Some(2));
        assert_eq!(body.column.as_deref(), Some("Spend"));
    }

    #[test]
    fn cancellation_is_an_abort() {
        let err = CoreError::from(ExecError { index: 0, kind: OperationKind::Sort, failure: ExecFailure::Cancelled });
        assert_eq!(err.kind(), ErrorKind::ExecutionAborted);
        assert!(err.is_cancelled());
    }

    #[test]
    fn compile_errors_map_to_wire_kinds() {
        let err = CoreError::from(CompileError::UnknownColumn {
            sheet: "Transactions".into(),
            column: "Profit".into(),
            suggestions: vec![],
        });
        assert_eq!(err.kind(), ErrorKind::UnknownColumn);
        assert_eq!(err.to_body().column.as_deref(), Some("Profit"));
        assert_eq!(err.operation_index(), None);
    }
}
