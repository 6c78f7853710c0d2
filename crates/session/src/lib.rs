//! Sheetwright core service.
//!
//! Owns every piece of per-upload state: the workbook handle registry, one
//! conversation per handle, and the artifact store. [`Service`] exposes the
//! operations callers use (ingest, converse, finalize, download) plus
//! explicit cancellation and sweeping of expired state.

pub mod artifacts;
pub mod clock;
pub mod conversation;
pub mod error;
mod registry;
pub mod service;

pub use artifacts::{ArtifactBackend, ArtifactStore, DirBackend, MemoryBackend, StoredArtifact};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::{Conversation, ConversationState, Exchange, Outcome, Policy};
pub use error::CoreError;
pub use service::{Ingested, Service, SweepReport, DEFAULT_TEXT_SHEET};
