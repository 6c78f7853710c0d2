//! The core operations: ingest, converse, finalize, download, plus explicit
//! cancellation and sweeping.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sheetwright_config::Settings;
use sheetwright_engine::{execute, CancelToken};
use sheetwright_intent::{
    analyze, compile, generate, AnalysisOptions, AnalysisResult, CompileOptions, IntentClassifier,
    KeywordClassifier,
};
use sheetwright_io::{read_workbook, write_workbook, ImportError};
use sheetwright_protocol::{ArtifactSummary, Finalized, Reply, Turn};

use crate::artifacts::{ArtifactStore, DirBackend};
use crate::clock::{after, Clock, SystemClock};
use crate::conversation::{Conversation, ConversationState, Policy};
use crate::error::CoreError;
use crate::registry::{Phase, Registry, Slot};

/// Sheet name given to delimited-text uploads when the caller names none.
pub const DEFAULT_TEXT_SHEET: &str = "Sheet1";

/// Result of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
    pub handle: String,
    pub analysis: AnalysisResult,
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Conversations idle past the timeout.
    pub abandoned: usize,
    /// Workbooks past their time-to-live.
    pub expired: usize,
    /// Released handles dropped from the registry.
    pub forgotten: usize,
    pub purged_artifacts: usize,
    /// Handles skipped because they were busy.
    pub busy: usize,
}

enum Lapse {
    Live,
    Idle,
    Expired,
}

pub struct Service {
    settings: Settings,
    clock: Arc<dyn Clock>,
    classifier: Arc<dyn IntentClassifier>,
    registry: Registry,
    artifacts: ArtifactStore,
}

impl Service {
    /// Service with the system clock, the keyword classifier and the
    /// artifact backend named by the settings.
    pub fn new(settings: Settings) -> Result<Self, CoreError> {
        let artifacts = match &settings.artifacts_dir {
            Some(dir) => {
                let backend = DirBackend::new(dir).map_err(|e| {
                    CoreError::ArtifactUnavailable(format!("artifact dir {}: {e}", dir.display()))
                })?;
                ArtifactStore::new(Box::new(backend), settings.retention())
            }
            None => ArtifactStore::in_memory(settings.retention()),
        };
        Ok(Self {
            clock: Arc::new(SystemClock),
            classifier: Arc::new(KeywordClassifier),
            registry: Registry::default(),
            artifacts,
            settings,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_artifact_store(mut self, store: ArtifactStore) -> Self {
        self.artifacts = store;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registered workbook handles across tenants, tombstones included.
    pub fn handle_count(&self) -> usize {
        self.registry.len()
    }

    fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            sample_limit: self.settings.sample_limit,
            category_max_distinct: self.settings.category_max_distinct,
            max_questions: self.settings.max_questions,
        }
    }

    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            fuzzy_threshold: self.settings.fuzzy_threshold,
            max_questions: self.settings.max_questions,
        }
    }

    fn policy(&self) -> Policy {
        Policy {
            max_retries: self.settings.max_retries,
            confidence_threshold: self.settings.confidence_threshold,
            classifier_timeout: self.settings.classifier_timeout(),
        }
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Register bytes under a fresh handle without analyzing them.
    pub fn upload(&self, tenant: &str, bytes: Vec<u8>, text_sheet_name: &str) -> String {
        let handle = format!("wb-{}", uuid::Uuid::new_v4().simple());
        let now = self.clock.now();
        self.registry.insert(
            tenant,
            Slot {
                handle: handle.clone(),
                phase: Phase::Unanalyzed { bytes, text_sheet_name: text_sheet_name.to_string() },
                conversation: None,
                expires_at: after(now, self.settings.workbook_ttl()),
            },
        );
        log::debug!("workbook {handle}: uploaded, awaiting analysis");
        handle
    }

    /// Run the ingestion pass on an uploaded handle. A handle that fails to
    /// parse is dropped.
    pub fn analyze(&self, tenant: &str, handle: &str) -> Result<Ingested, CoreError> {
        let entry = self.registry.get(tenant, handle)?;
        let mut slot = entry.slot.lock();

        let parsed = match &slot.phase {
            Phase::Ready { analysis, .. } => {
                return Ok(Ingested { handle: handle.to_string(), analysis: (**analysis).clone() });
            }
            Phase::Released { .. } => return Err(CoreError::UnknownHandle(handle.to_string())),
            Phase::Unanalyzed { bytes, text_sheet_name } => read_workbook(bytes, text_sheet_name),
        };

        let workbook = match parsed {
            Ok(wb) if !wb.is_empty_dataset() => wb,
            failed => {
                drop(slot);
                self.registry.remove(tenant, handle);
                return Err(match failed {
                    Err(ImportError::Unreadable(msg)) => {
                        log::info!("workbook {handle}: unreadable: {msg}");
                        CoreError::InvalidWorkbook(msg)
                    }
                    _ => {
                        log::info!("workbook {handle}: no data rows");
                        CoreError::EmptyDataset
                    }
                });
            }
        };

        let analysis = analyze(&workbook, &self.analysis_options());
        log::info!(
            "workbook {handle}: {} sheet(s), {} row(s), {} candidate transformation(s)",
            workbook.sheet_count(),
            workbook.total_rows(),
            analysis.templates.len()
        );
        let out = Ingested { handle: handle.to_string(), analysis: analysis.clone() };
        slot.phase = Phase::Ready { workbook: Arc::new(workbook), analysis: Arc::new(analysis) };
        Ok(out)
    }

    pub fn ingest(&self, tenant: &str, bytes: Vec<u8>) -> Result<Ingested, CoreError> {
        self.ingest_named(tenant, bytes, DEFAULT_TEXT_SHEET)
    }

    /// Ingest, naming the sheet a delimited-text upload becomes.
    pub fn ingest_named(&self, tenant: &str, bytes: Vec<u8>, text_sheet_name: &str) -> Result<Ingested, CoreError> {
        let handle = self.upload(tenant, bytes, text_sheet_name);
        self.analyze(tenant, &handle)
    }

    // ========================================================================
    // Conversation
    // ========================================================================

    /// Start a conversation (`turn` = None) or answer its current step.
    pub fn converse(&self, tenant: &str, handle: &str, turn: Option<Turn>) -> Result<Reply, CoreError> {
        let entry = self.registry.get(tenant, handle)?;
        let mut slot = entry.slot.lock();
        let now = self.clock.now();
        self.check_lapse(&mut slot, now);

        let analysis = match &slot.phase {
            Phase::Unanalyzed { .. } => return Err(CoreError::Unanalyzed(handle.to_string())),
            Phase::Released { .. } => return Ok(Reply::Abandoned { handle: handle.to_string() }),
            Phase::Ready { analysis, .. } => Arc::clone(analysis),
        };

        let active = slot.conversation.as_ref().map(Conversation::state);
        match (turn, active) {
            (None, Some(state)) if !state.is_terminal() => Err(CoreError::ConversationActive(handle.to_string())),
            (None, _) => {
                let mut conv = Conversation::new(generate(&analysis, self.settings.max_questions), now);
                let reply = conv.start(now);
                log::info!("workbook {handle}: conversation started ({})", conv.state());
                slot.conversation = Some(conv);
                Ok(reply)
            }
            (Some(_), Some(ConversationState::Abandoned)) => Ok(Reply::Abandoned { handle: handle.to_string() }),
            (Some(turn), _) => {
                let Some(conv) = slot.conversation.as_mut() else {
                    return Err(CoreError::StaleConversationStep { expected: 0, got: turn.step });
                };
                let reply = conv.answer(turn, &self.classifier, &analysis.templates, &self.policy(), now)?;
                log::debug!("workbook {handle}: step {} ({})", conv.step(), conv.state());
                Ok(reply)
            }
        }
    }

    /// Stop the execution in flight, or abandon the active conversation when
    /// nothing is executing. Returns false when there was nothing to cancel.
    ///
    /// Cancelling a run leaves the conversation alone: the finalize call
    /// fails and the conversation returns to READY_TO_COMPILE for a retry.
    /// Cancelling again once nothing runs abandons it.
    pub fn cancel(&self, tenant: &str, handle: &str) -> Result<bool, CoreError> {
        let entry = self.registry.get(tenant, handle)?;
        if let Some(token) = entry.running.lock().as_ref() {
            token.cancel();
            log::info!("workbook {handle}: execution cancelled");
            return Ok(true);
        }

        let mut slot = entry.slot.lock();
        match slot.conversation.as_mut() {
            Some(conv) if !conv.state().is_terminal() => {
                conv.abandon();
                log::info!("workbook {handle}: conversation cancelled");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ========================================================================
    // Finalize
    // ========================================================================

    /// Compile, execute and store. On any failure the conversation returns
    /// to READY_TO_COMPILE and nothing is published.
    pub fn finalize(&self, tenant: &str, handle: &str, cancel: &CancelToken) -> Result<Finalized, CoreError> {
        let entry = self.registry.get(tenant, handle)?;
        let mut slot = entry.slot.lock();
        let now = self.clock.now();
        self.check_lapse(&mut slot, now);

        let (workbook, analysis) = match &slot.phase {
            Phase::Unanalyzed { .. } => return Err(CoreError::Unanalyzed(handle.to_string())),
            Phase::Released { reason, .. } => {
                return Err(CoreError::NotReadyToCompile(format!("conversation was abandoned ({reason})")))
            }
            Phase::Ready { workbook, analysis } => (Arc::clone(workbook), Arc::clone(analysis)),
        };
        let conv = slot
            .conversation
            .as_mut()
            .ok_or_else(|| CoreError::NotReadyToCompile("no conversation has been started".to_string()))?;
        conv.begin_compile()?;

        let plan = match conv.plan() {
            Some(plan) => plan.clone(),
            None => match compile(conv.requirements(), &analysis, &self.compile_options()) {
                Ok(plan) => {
                    conv.set_plan(plan.clone());
                    plan
                }
                Err(e) => {
                    log::info!("workbook {handle}: compile failed: {e}");
                    conv.compile_aborted();
                    return Err(e.into());
                }
            },
        };

        *entry.running.lock() = Some(cancel.clone());
        let result = execute(&workbook, &plan, cancel);
        *entry.running.lock() = None;

        let published = result
            .map_err(CoreError::from)
            .and_then(|execution| {
                let bytes = write_workbook(&execution.workbook)
                    .map_err(|e| CoreError::ArtifactUnavailable(e.to_string()))?;
                let stored = self.artifacts.put(tenant, &bytes, now)?;
                Ok((execution, stored))
            });

        let (execution, stored) = match published {
            Ok(done) => done,
            Err(e) => {
                log::info!("workbook {handle}: finalize aborted: {e}");
                conv.compile_aborted();
                return Err(e);
            }
        };

        conv.finish();
        slot.conversation = None;
        log::info!("workbook {handle}: finalized as {} ({} operation(s))", stored.handle, plan.len());

        Ok(Finalized {
            plan,
            artifact: ArtifactSummary {
                handle: stored.handle,
                expires_at: stored.expires_at.to_rfc3339(),
                digest: stored.digest,
                size_bytes: stored.size_bytes,
                log: execution.log,
                sheets: execution.sheets,
                merges: execution.merges,
                coerced_cells: execution.coerced_cells,
            },
        })
    }

    pub fn download(&self, tenant: &str, artifact: &str) -> Result<Vec<u8>, CoreError> {
        self.artifacts.get(tenant, artifact, self.clock.now())
    }

    // ========================================================================
    // Lifetimes
    // ========================================================================

    fn check_lapse(&self, slot: &mut Slot, now: DateTime<Utc>) -> Lapse {
        if matches!(slot.phase, Phase::Released { .. }) {
            return Lapse::Live;
        }
        if now >= slot.expires_at {
            slot.release("workbook expired", now);
            return Lapse::Expired;
        }
        let idle = slot
            .conversation
            .as_ref()
            .is_some_and(|c| c.is_idle(now, self.settings.idle_timeout()));
        if idle {
            slot.release("conversation idle", now);
            return Lapse::Idle;
        }
        Lapse::Live
    }

    /// Apply idle timeouts, workbook TTLs and artifact retention.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for (tenant, entry) in self.registry.snapshot() {
            let Some(mut slot) = entry.slot.try_lock() else {
                report.busy += 1;
                continue;
            };
            match self.check_lapse(&mut slot, now) {
                Lapse::Idle => report.abandoned += 1,
                Lapse::Expired => report.expired += 1,
                Lapse::Live => {}
            }
            // Tombstones outlive the release by one more TTL
            let released_at = match slot.phase {
                Phase::Released { at, .. } => Some(at),
                _ => None,
            };
            if released_at.is_some_and(|at| after(at, self.settings.workbook_ttl()) <= now) {
                let handle = slot.handle.clone();
                drop(slot);
                self.registry.remove(&tenant, &handle);
                report.forgotten += 1;
            }
        }

        report.purged_artifacts = self.artifacts.purge_expired(now);
        if report != SweepReport::default() {
            log::info!("sweep: {report:?}");
        }
        report
    }

    /// Conversation state on a handle, if one exists.
    pub fn conversation_state(&self, tenant: &str, handle: &str) -> Result<Option<ConversationState>, CoreError> {
        let entry = self.registry.get(tenant, handle)?;
        let slot = entry.slot.lock();
        Ok(slot.conversation.as_ref().map(Conversation::state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    const CSV: &[u8] = b"Date,Category,Revenue,Spend\n2024-01-05,Ads,1200,300\n2024-02-02,Ads,800,400\n";

    fn service() -> (Service, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let svc = Service::new(Settings::default()).unwrap().with_clock(clock.clone());
        (svc, clock)
    }

    #[test]
    fn unanalyzed_handle_cannot_converse() {
        let (svc, _) = service();
        let handle = svc.upload("t", CSV.to_vec(), "Transactions");
        assert_eq!(svc.converse("t", &handle, None), Err(CoreError::Unanalyzed(handle.clone())));
        svc.analyze("t", &handle).unwrap();
        assert!(matches!(svc.converse("t", &handle, None).unwrap(), Reply::Question { step: 1, .. }));
    }

    #[test]
    fn failed_analysis_drops_handle() {
        let (svc, _) = service();
        let handle = svc.upload("t", b"a,b\n".to_vec(), "S");
        assert_eq!(svc.analyze("t", &handle).unwrap_err(), CoreError::EmptyDataset);
        assert!(matches!(svc.converse("t", &handle, None), Err(CoreError::UnknownHandle(_))));
    }

    #[test]
    fn second_start_is_rejected() {
        let (svc, _) = service();
        let ing = svc.ingest_named("t", CSV.to_vec(), "Transactions").unwrap();
        svc.converse("t", &ing.handle, None).unwrap();
        assert_eq!(
            svc.converse("t", &ing.handle, None),
            Err(CoreError::ConversationActive(ing.handle.clone()))
        );
    }

    #[test]
    fn idle_conversation_is_abandoned_not_failed() {
        let (svc, clock) = service();
        let ing = svc.ingest_named("t", CSV.to_vec(), "Transactions").unwrap();
        svc.converse("t", &ing.handle, None).unwrap();
        clock.advance(Duration::from_secs(901));

        let report = svc.sweep();
        assert_eq!(report.abandoned, 1);
        let reply = svc.converse("t", &ing.handle, Some(Turn { step: 1, answer: sheetwright_protocol::Answer::YesNo(true) }));
        assert_eq!(reply, Ok(Reply::Abandoned { handle: ing.handle.clone() }));
    }

    #[test]
    fn tombstones_are_forgotten_later() {
        let (svc, clock) = service();
        let ing = svc.ingest_named("t", CSV.to_vec(), "Transactions").unwrap();
        clock.advance(Duration::from_secs(3600));
        assert_eq!(svc.sweep().expired, 1);
        assert_eq!(svc.handle_count(), 1);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(svc.sweep().forgotten, 1);
        assert!(matches!(svc.converse("t", &ing.handle, None), Err(CoreError::UnknownHandle(_))));
    }

    #[test]
    fn tenants_are_isolated() {
        let (svc, _) = service();
        let ing = svc.ingest_named("alice", CSV.to_vec(), "Transactions").unwrap();
        assert!(matches!(svc.converse("bob", &ing.handle, None), Err(CoreError::UnknownHandle(_))));
    }

    #[test]
    fn cancel_during_execution_keeps_the_conversation() {
        let (svc, _) = service();
        let ing = svc.ingest_named("t", CSV.to_vec(), "Transactions").unwrap();
        svc.converse("t", &ing.handle, None).unwrap();
        svc.converse("t", &ing.handle, Some(Turn { step: 1, answer: sheetwright_protocol::Answer::YesNo(true) }))
            .unwrap();
        let done = Turn { step: 2, answer: sheetwright_protocol::Answer::FreeText("done".into()) };
        assert!(matches!(svc.converse("t", &ing.handle, Some(done)).unwrap(), Reply::ReadyToCompile { .. }));

        // an execution is in flight
        let entry = svc.registry.get("t", &ing.handle).unwrap();
        let token = CancelToken::new();
        *entry.running.lock() = Some(token.clone());

        assert!(svc.cancel("t", &ing.handle).unwrap());
        assert!(token.is_cancelled());
        assert_eq!(svc.conversation_state("t", &ing.handle).unwrap(), Some(ConversationState::ReadyToCompile));

        *entry.running.lock() = None;
        assert!(svc.finalize("t", &ing.handle, &token).unwrap_err().is_cancelled());
        assert_eq!(svc.conversation_state("t", &ing.handle).unwrap(), Some(ConversationState::ReadyToCompile));
        assert_eq!(svc.finalize("t", &ing.handle, &CancelToken::new()).unwrap().plan.len(), 1);

        // nothing running: cancel abandons
        svc.converse("t", &ing.handle, None).unwrap();
        assert!(svc.cancel("t", &ing.handle).unwrap());
        assert_eq!(svc.conversation_state("t", &ing.handle).unwrap(), Some(ConversationState::Abandoned));
    }

    #[test]
    fn finalize_before_ready_is_rejected() {
        let (svc, _) = service();
        let ing = svc.ingest_named("t", CSV.to_vec(), "Transactions").unwrap();
        assert!(matches!(
            svc.finalize("t", &ing.handle, &CancelToken::new()),
            Err(CoreError::NotReadyToCompile(_))
        ));
        svc.converse("t", &ing.handle, None).unwrap();
        assert!(matches!(
            svc.finalize("t", &ing.handle, &CancelToken::new()),
            Err(CoreError::NotReadyToCompile(_))
        ));
    }
}
