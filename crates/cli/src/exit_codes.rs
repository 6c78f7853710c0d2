//! CLI Exit Code Registry
//!
//! Single source of truth for `swr` exit codes. Scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain        | Description                                  |
//! |---------|---------------|----------------------------------------------|
//! | 0       | Universal     | Success                                      |
//! | 1       | Universal     | General error (unspecified)                  |
//! | 2       | Universal     | CLI usage error (bad args, missing file)     |
//! | 3-9     | input         | Reading the workbook or the settings file    |
//! | 10-19   | conversation  | Answers and conversation lifecycle           |
//! | 20-29   | plan          | Compiling and executing the plan             |
//! | 30-39   | artifact      | Storing and retrieving the output            |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Update the table above
//! 3. Map the error kind in `error_exit_code`

use serde::Serialize;
use sheetwright_protocol::{ErrorBody, ErrorKind};

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable input path.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Input (3-9)
// =============================================================================

/// Bytes are not a workbook in any supported format.
pub const EXIT_INVALID_WORKBOOK: u8 = 3;

/// Workbook parsed but holds no data.
pub const EXIT_EMPTY_DATASET: u8 = 4;

/// Writing the output file failed.
pub const EXIT_IO: u8 = 5;

/// Settings file given with --config could not be read or parsed.
pub const EXIT_CONFIG: u8 = 6;

// =============================================================================
// Conversation (10-19)
// =============================================================================

/// Answer carried a step the conversation is no longer at.
pub const EXIT_STALE_STEP: u8 = 10;

/// Answer does not fit the pending question.
pub const EXIT_INVALID_ANSWER: u8 = 11;

/// A conversation is already running on the handle.
pub const EXIT_CONVERSATION_ACTIVE: u8 = 12;

/// Finalize called before the conversation was ready.
pub const EXIT_NOT_READY: u8 = 13;

/// Conversation fell back to no changes (only with --strict).
pub const EXIT_FALLBACK: u8 = 14;

/// Conversation was abandoned before it finished.
pub const EXIT_ABANDONED: u8 = 15;

// =============================================================================
// Plan (20-29)
// =============================================================================

/// Plan references a column that does not exist.
pub const EXIT_UNKNOWN_COLUMN: u8 = 20;

/// Plan references a sheet that does not exist.
pub const EXIT_UNKNOWN_SHEET: u8 = 21;

/// Filter cannot be evaluated against its column.
pub const EXIT_INVALID_FILTER: u8 = 22;

/// Execution was cancelled or aborted.
pub const EXIT_EXECUTION_ABORTED: u8 = 23;

/// Intent classification timed out.
pub const EXIT_CLASSIFIER_TIMEOUT: u8 = 24;

// =============================================================================
// Artifact (30-39)
// =============================================================================

/// Artifact is past its retention window.
pub const EXIT_ARTIFACT_EXPIRED: u8 = 30;

/// Artifact payload is missing or failed verification.
pub const EXIT_ARTIFACT_UNAVAILABLE: u8 = 31;

/// Workbook or artifact handle is unknown.
pub const EXIT_UNKNOWN_HANDLE: u8 = 32;

/// Workbook handle was never analyzed.
pub const EXIT_UNANALYZED: u8 = 33;

/// Map a caller-visible error kind to its exit code.
pub fn error_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidWorkbook => EXIT_INVALID_WORKBOOK,
        ErrorKind::EmptyDataset => EXIT_EMPTY_DATASET,
        ErrorKind::StaleConversationStep => EXIT_STALE_STEP,
        ErrorKind::InvalidAnswer => EXIT_INVALID_ANSWER,
        ErrorKind::ConversationActive => EXIT_CONVERSATION_ACTIVE,
        ErrorKind::NotReadyToCompile => EXIT_NOT_READY,
        ErrorKind::UnknownColumn => EXIT_UNKNOWN_COLUMN,
        ErrorKind::UnknownSheet => EXIT_UNKNOWN_SHEET,
        ErrorKind::InvalidFilter => EXIT_INVALID_FILTER,
        ErrorKind::ExecutionAborted => EXIT_EXECUTION_ABORTED,
        ErrorKind::ClassificationTimeout => EXIT_CLASSIFIER_TIMEOUT,
        ErrorKind::ArtifactExpired => EXIT_ARTIFACT_EXPIRED,
        ErrorKind::ArtifactUnavailable => EXIT_ARTIFACT_UNAVAILABLE,
        ErrorKind::UnknownHandle => EXIT_UNKNOWN_HANDLE,
        ErrorKind::Unanalyzed => EXIT_UNANALYZED,
    }
}

/// Structured error output for `--json` runs, written to stderr.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    #[serde(flatten)]
    pub body: ErrorBody,
    pub exit_code: u8,
}

impl ErrorOutput {
    pub fn new(body: ErrorBody) -> Self {
        let exit_code = error_exit_code(body.kind);
        Self { body, exit_code }
    }

    pub fn print(&self) {
        if let Ok(output) = serde_json::to_string(self) {
            eprintln!("{}", output);
        }
    }
}
