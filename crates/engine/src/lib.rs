//! Workbook model and transformation executor.
//!
//! The model is plain: a workbook is an ordered list of named
//! sheets, each a header row plus rectangular typed rows. Everything the
//! conversation layer decides ends up as a `TransformationPlan` that
//! [`exec::execute`] applies to a copy.

pub mod cell;
pub mod exec;
pub mod keys;
pub mod sheet;
pub mod workbook;

pub use cell::{CellValue, KindVotes, ValueKind};
pub use exec::{execute, CancelToken, ExecError, ExecFailure, Execution};
pub use sheet::Sheet;
pub use workbook::{DuplicateSheet, Workbook};
