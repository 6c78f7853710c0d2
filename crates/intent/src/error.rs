use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Column reference with no candidate above the similarity threshold.
    UnknownColumn { sheet: String, column: String, suggestions: Vec<String> },
    /// Sheet reference with no candidate above the similarity threshold.
    UnknownSheet { sheet: String },
    /// Predicate type incompatible with the column's inferred type.
    InvalidFilter { index: usize, column: String, reason: String },
    /// Answer recorded against a question this analysis does not produce.
    UnknownQuestion { id: String },
    /// Choice answer naming an option the question does not offer.
    UnknownOption { question: String, option: String },
}

impl CompileError {
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::UnknownColumn { column, .. } | Self::InvalidFilter { column, .. } => Some(column),
            _ => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownColumn { sheet, column, suggestions } => {
                write!(f, "sheet '{sheet}': unknown column '{column}'")?;
                if !suggestions.is_empty() {
                    write!(f, " (did you mean {}?)", suggestions.join(", "))?;
                }
                Ok(())
            }
            Self::UnknownSheet { sheet } => write!(f, "unknown sheet '{sheet}'"),
            Self::InvalidFilter { index, column, reason } => {
                write!(f, "operation {index}: invalid filter on '{column}': {reason}")
            }
            Self::UnknownQuestion { id } => write!(f, "unknown question '{id}'"),
            Self::UnknownOption { question, option } => {
                write!(f, "question '{question}' has no option '{option}'")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Intent classifier failure. Both variants count as "no match".
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyError {
    Timeout,
    Failed(String),
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "intent classifier timed out"),
            Self::Failed(msg) => write!(f, "intent classifier failed: {msg}"),
        }
    }
}

impl std::error::Error for ClassifyError {}
