//! From workbook to plan.
//!
//! `analyze` infers column semantics and candidate transformations,
//! `questions` turns those into a fixed question list, `classify` maps free
//! text onto the same candidates, and `compiler` folds the accepted answers
//! into a validated [`TransformationPlan`](sheetwright_protocol::TransformationPlan).
//! Nothing here holds state between calls.

pub mod analyze;
pub mod classify;
pub mod compiler;
pub mod error;
pub mod fuzzy;
pub mod model;
pub mod questions;
pub mod requirements;
pub mod templates;
pub mod text;

pub use analyze::{analyze, AnalysisOptions};
pub use classify::{best_match, classify_with_timeout, IntentClassifier, KeywordClassifier, TemplateMatch};
pub use compiler::{compile, CompileOptions};
pub use error::{ClassifyError, CompileError};
pub use model::{AnalysisResult, ColumnSchema, SemanticType, SheetSchema, Template, TemplateGroup};
pub use questions::{generate, Binding, GeneratedQuestion, NONE_OPTION, OPEN_QUESTION_ID};
pub use requirements::{Requirement, RequirementEntry, RequirementSet};
