//! Per-handle state.
//!
//! The registry map is locked only to look up, insert or remove an entry.
//! Each entry has its own lock, so work on one handle is serialized while
//! distinct handles proceed in parallel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sheetwright_engine::{CancelToken, Workbook};
use sheetwright_intent::AnalysisResult;

use crate::conversation::Conversation;
use crate::error::CoreError;

/// Where a workbook handle is in its life.
#[derive(Debug)]
pub(crate) enum Phase {
    /// Bytes received, no ingestion pass yet. Nothing may converse.
    Unanalyzed { bytes: Vec<u8>, text_sheet_name: String },
    Ready { workbook: Arc<Workbook>, analysis: Arc<AnalysisResult> },
    /// Resources freed; kept so a returning caller learns what happened.
    Released { reason: &'static str, at: DateTime<Utc> },
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub handle: String,
    pub phase: Phase,
    pub conversation: Option<Conversation>,
    pub expires_at: DateTime<Utc>,
}

impl Slot {
    pub fn release(&mut self, reason: &'static str, now: DateTime<Utc>) {
        if let Some(conv) = self.conversation.as_mut() {
            conv.abandon();
        }
        self.conversation = None;
        self.phase = Phase::Released { reason, at: now };
        log::info!("workbook {}: released ({reason})", self.handle);
    }
}

pub(crate) struct Entry {
    pub slot: Mutex<Slot>,
    /// Token of the execution in flight, reachable without the slot lock.
    pub running: Mutex<Option<CancelToken>>,
}

type Key = (String, String);

#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<FxHashMap<Key, Arc<Entry>>>,
}

impl Registry {
    pub fn insert(&self, tenant: &str, slot: Slot) {
        let key = (tenant.to_string(), slot.handle.clone());
        let entry = Arc::new(Entry { slot: Mutex::new(slot), running: Mutex::new(None) });
        self.entries.lock().insert(key, entry);
    }

    /// Handles are namespaced by tenant: another tenant's handle is unknown.
    pub fn get(&self, tenant: &str, handle: &str) -> Result<Arc<Entry>, CoreError> {
        self.entries
            .lock()
            .get(&(tenant.to_string(), handle.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::UnknownHandle(handle.to_string()))
    }

    pub fn remove(&self, tenant: &str, handle: &str) {
        self.entries.lock().remove(&(tenant.to_string(), handle.to_string()));
    }

    pub fn snapshot(&self) -> Vec<(String, Arc<Entry>)> {
        self.entries.lock().iter().map(|((tenant, _), e)| (tenant.clone(), Arc::clone(e))).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
