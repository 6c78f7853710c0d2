//! Conversation state machine.
//!
//! ```text
//! INIT -> AWAITING_ANSWER (loops) -> READY_TO_COMPILE -> COMPILING -> DONE
//!                  any non-terminal state -> ABANDONED
//! ```
//!
//! The step counter names the exchange the caller must answer. It moves by
//! exactly one per accepted answer; answers for any other step are rejected
//! before anything is touched. Free text the question cannot absorb goes to
//! the intent classifier. Unmatched text counts against a retry cap, and
//! hitting the cap freezes the conversation with a no-op plan.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetwright_intent::classify::{best_match, classify_with_timeout, IntentClassifier};
use sheetwright_intent::text::normalize;
use sheetwright_intent::{
    Binding, ClassifyError, GeneratedQuestion, Requirement, RequirementSet, Template, NONE_OPTION,
};
use sheetwright_protocol::{Answer, QuestionKind, Reply, TransformationPlan, Turn, FALLBACK_MESSAGE};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Init,
    AwaitingAnswer,
    ReadyToCompile,
    Compiling,
    Done,
    Abandoned,
}

impl ConversationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversationState::Done | ConversationState::Abandoned)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConversationState::Init => "INIT",
            ConversationState::AwaitingAnswer => "AWAITING_ANSWER",
            ConversationState::ReadyToCompile => "READY_TO_COMPILE",
            ConversationState::Compiling => "COMPILING",
            ConversationState::Done => "DONE",
            ConversationState::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// Retry and classifier limits for one conversation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    pub max_retries: u32,
    pub confidence_threshold: f64,
    pub classifier_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            confidence_threshold: 0.6,
            classifier_timeout: Duration::from_millis(2000),
        }
    }
}

/// What happened to one submitted answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Recorded,
    Intent { template_id: String },
    Unresolved,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub step: u64,
    pub question_id: String,
    pub answer: Answer,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// How an answer reads against the question it was given for.
#[derive(Debug, Clone, PartialEq)]
enum Reading {
    Answer(Answer),
    Completed,
    Utterance(String),
}

const DONE_PHRASES: &[&str] = &[
    "done", "alldone", "finish", "finished", "thatsall", "thatisall", "nothingelse", "nomore",
    "thatsit", "compile",
];
const YES_WORDS: &[&str] = &["yes", "y", "yeah", "yep", "sure", "ok", "okay", "please"];
const NO_WORDS: &[&str] = &["no", "n", "nope", "nah", "skip"];
const NOTHING_WORDS: &[&str] = &["no", "nope", "nah", "nothing", "none"];

fn among(text: &str, words: &[&str]) -> bool {
    let key = normalize(text);
    words.contains(&key.as_str())
}

#[derive(Debug, Clone)]
pub struct Conversation {
    state: ConversationState,
    step: u64,
    questions: Vec<GeneratedQuestion>,
    cursor: usize,
    history: Vec<Exchange>,
    requirements: RequirementSet,
    retries: u32,
    fallback: bool,
    plan: Option<TransformationPlan>,
    last_activity: DateTime<Utc>,
}

impl Conversation {
    pub fn new(questions: Vec<GeneratedQuestion>, now: DateTime<Utc>) -> Self {
        Self {
            state: ConversationState::Init,
            step: 0,
            questions,
            cursor: 0,
            history: Vec::new(),
            requirements: RequirementSet::new(),
            retries: 0,
            fallback: false,
            plan: None,
            last_activity: now,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    pub fn requirements(&self) -> &RequirementSet {
        &self.requirements
    }

    /// True once the retry cap forced a no-op plan.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn current_question(&self) -> Option<&GeneratedQuestion> {
        match self.state {
            ConversationState::AwaitingAnswer => self.questions.get(self.cursor),
            _ => None,
        }
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        !self.state.is_terminal() && crate::clock::after(self.last_activity, timeout) <= now
    }

    /// INIT -> first question, or straight to READY_TO_COMPILE when there
    /// is nothing to ask.
    pub fn start(&mut self, now: DateTime<Utc>) -> Reply {
        debug_assert_eq!(self.state, ConversationState::Init);
        self.step = 1;
        self.last_activity = now;
        if self.questions.is_empty() {
            self.transition(ConversationState::ReadyToCompile);
        } else {
            self.transition(ConversationState::AwaitingAnswer);
        }
        self.reply(None)
    }

    /// Current prompt, without changing anything.
    pub fn reply(&self, notice: Option<String>) -> Reply {
        match (self.state, self.current_question()) {
            (ConversationState::AwaitingAnswer, Some(q)) => Reply::Question {
                step: self.step,
                question: q.question.clone(),
                notice,
            },
            _ if self.fallback => Reply::Fallback { step: self.step, message: FALLBACK_MESSAGE.to_string() },
            _ => Reply::ReadyToCompile { step: self.step, summary: self.requirements.summary() },
        }
    }

    /// Apply one turn.
    pub fn answer(
        &mut self,
        turn: Turn,
        classifier: &Arc<dyn IntentClassifier>,
        templates: &[Template],
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> Result<Reply, CoreError> {
        if turn.step != self.step {
            log::debug!("stale answer: step {} while at {}", turn.step, self.step);
            return Err(CoreError::StaleConversationStep { expected: self.step, got: turn.step });
        }
        if self.state != ConversationState::AwaitingAnswer {
            return Err(CoreError::InvalidAnswer(format!(
                "conversation is {}; requirements are frozen",
                self.state
            )));
        }
        let Some(question) = self.questions.get(self.cursor).cloned() else {
            return Err(CoreError::InvalidAnswer("no question is pending".to_string()));
        };

        let reading = read_answer(&question, &turn.answer)?;
        self.last_activity = now;
        let question_id = question.question.id.clone();

        match reading {
            Reading::Answer(answer) => {
                self.requirements.record(self.step, Requirement::Answered {
                    question_id: question_id.clone(),
                    answer,
                });
                self.log_exchange(question_id, turn.answer, Outcome::Recorded);
                self.accept(true);
                Ok(self.reply(None))
            }
            Reading::Completed => {
                self.log_exchange(question_id, turn.answer, Outcome::Completed);
                self.step += 1;
                self.retries = 0;
                self.transition(ConversationState::ReadyToCompile);
                Ok(self.reply(None))
            }
            Reading::Utterance(text) => {
                let outcome = classify_with_timeout(
                    Arc::clone(classifier),
                    &text,
                    templates,
                    policy.classifier_timeout,
                );
                let hit = match &outcome {
                    Ok(matches) => best_match(matches, policy.confidence_threshold)
                        .and_then(|m| templates.iter().find(|t| t.id == m.template_id)),
                    Err(e) => {
                        log::info!("classifier gave no answer: {e}");
                        None
                    }
                };

                match hit {
                    Some(template) => {
                        log::info!("'{text}' matched template {}", template.id);
                        self.requirements.record(self.step, Requirement::Intent {
                            utterance: text,
                            template_id: template.id.clone(),
                            operations: template.operations.clone(),
                        });
                        self.log_exchange(
                            question_id,
                            turn.answer,
                            Outcome::Intent { template_id: template.id.clone() },
                        );
                        // The open question stays open for more requests
                        self.accept(question.binding != Binding::Open);
                        Ok(self.reply(Some(format!("Added: {}.", template.summary))))
                    }
                    None => Ok(self.unresolved(question_id, turn.answer, &outcome, policy)),
                }
            }
        }
    }

    fn unresolved(
        &mut self,
        question_id: String,
        answer: Answer,
        outcome: &Result<Vec<sheetwright_intent::TemplateMatch>, ClassifyError>,
        policy: &Policy,
    ) -> Reply {
        self.log_exchange(question_id, answer, Outcome::Unresolved);
        self.retries += 1;

        if self.retries >= policy.max_retries {
            log::warn!("retry cap of {} reached; falling back to no changes", policy.max_retries);
            self.fallback = true;
            self.plan = Some(TransformationPlan::fallback());
            self.transition(ConversationState::ReadyToCompile);
            return self.reply(None);
        }

        let left = policy.max_retries - self.retries;
        let why = match outcome {
            Err(ClassifyError::Timeout) => "That took too long to interpret.",
            _ => "Sorry, I couldn't match that to a change I know how to make.",
        };
        self.reply(Some(format!(
            "{why} Try rephrasing or answer the question directly ({left} attempt{} left).",
            if left == 1 { "" } else { "s" }
        )))
    }

    fn accept(&mut self, move_on: bool) {
        self.step += 1;
        self.retries = 0;
        if move_on {
            self.cursor += 1;
        }
        if self.cursor >= self.questions.len() {
            self.transition(ConversationState::ReadyToCompile);
        }
    }

    fn log_exchange(&mut self, question_id: String, answer: Answer, outcome: Outcome) {
        self.history.push(Exchange { step: self.step, question_id, answer, outcome });
    }

    fn transition(&mut self, to: ConversationState) {
        if self.state != to {
            log::debug!("conversation: {} -> {}", self.state, to);
            self.state = to;
        }
    }

    // ------------------------------------------------------------------------
    // Finalize hooks
    // ------------------------------------------------------------------------

    /// READY_TO_COMPILE -> COMPILING.
    pub fn begin_compile(&mut self) -> Result<(), CoreError> {
        match self.state {
            ConversationState::ReadyToCompile => {
                self.transition(ConversationState::Compiling);
                Ok(())
            }
            other => Err(CoreError::NotReadyToCompile(format!("conversation is {other}"))),
        }
    }

    /// Plan compiled for this conversation, if any. Fixed once set.
    pub fn plan(&self) -> Option<&TransformationPlan> {
        self.plan.as_ref()
    }

    pub fn set_plan(&mut self, plan: TransformationPlan) {
        if self.plan.is_none() {
            self.plan = Some(plan);
        }
    }

    /// COMPILING -> READY_TO_COMPILE after a failed or cancelled run.
    pub fn compile_aborted(&mut self) {
        if self.state == ConversationState::Compiling {
            self.transition(ConversationState::ReadyToCompile);
        }
    }

    pub fn finish(&mut self) {
        self.transition(ConversationState::Done);
    }

    pub fn abandon(&mut self) {
        if !self.state.is_terminal() {
            self.transition(ConversationState::Abandoned);
        }
    }
}

/// Interpret `answer` in the context of `question`.
fn read_answer(question: &GeneratedQuestion, answer: &Answer) -> Result<Reading, CoreError> {
    let id = &question.question.id;
    match (&question.question.kind, answer) {
        (_, Answer::FreeText(text)) if among(text, DONE_PHRASES) => Ok(Reading::Completed),

        (QuestionKind::YesNo, Answer::YesNo(b)) => Ok(Reading::Answer(Answer::YesNo(*b))),
        (QuestionKind::YesNo, Answer::FreeText(text) | Answer::Choice(text)) => {
            if among(text, YES_WORDS) {
                Ok(Reading::Answer(Answer::YesNo(true)))
            } else if among(text, NO_WORDS) {
                Ok(Reading::Answer(Answer::YesNo(false)))
            } else if matches!(answer, Answer::FreeText(_)) {
                Ok(Reading::Utterance(text.clone()))
            } else {
                Err(CoreError::InvalidAnswer(format!("'{id}' takes yes or no")))
            }
        }

        (QuestionKind::MultipleChoice { options }, Answer::Choice(choice)) => {
            if options.iter().any(|o| o.id == *choice) {
                Ok(Reading::Answer(Answer::Choice(choice.clone())))
            } else {
                Err(CoreError::InvalidAnswer(format!("'{choice}' is not an option of '{id}'")))
            }
        }
        (QuestionKind::MultipleChoice { .. }, Answer::YesNo(false)) => {
            Ok(Reading::Answer(Answer::Choice(NONE_OPTION.to_string())))
        }
        (QuestionKind::MultipleChoice { .. }, Answer::YesNo(true)) => {
            Err(CoreError::InvalidAnswer(format!("'{id}' needs one of its options")))
        }
        (QuestionKind::MultipleChoice { options }, Answer::FreeText(text)) => {
            let key = normalize(text);
            if let Some(option) = options.iter().find(|o| normalize(&o.label) == key || normalize(&o.id) == key) {
                Ok(Reading::Answer(Answer::Choice(option.id.clone())))
            } else if among(text, NOTHING_WORDS) {
                Ok(Reading::Answer(Answer::Choice(NONE_OPTION.to_string())))
            } else {
                Ok(Reading::Utterance(text.clone()))
            }
        }

        (QuestionKind::FreeText, Answer::FreeText(text)) => {
            if among(text, NOTHING_WORDS) {
                Ok(Reading::Completed)
            } else {
                Ok(Reading::Utterance(text.clone()))
            }
        }
        (QuestionKind::FreeText, Answer::YesNo(false)) => Ok(Reading::Completed),
        (QuestionKind::FreeText, _) => Err(CoreError::InvalidAnswer(format!(
            "'{id}' takes free text; describe the change or say 'done'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetwright_intent::model::{AnalysisResult, ColumnSchema, SemanticType, SheetSchema};
    use sheetwright_intent::templates::detect_templates;
    use sheetwright_intent::{generate, KeywordClassifier, TemplateMatch, OPEN_QUESTION_ID};

    fn analysis() -> AnalysisResult {
        let sheets = vec![SheetSchema {
            name: "Transactions".into(),
            row_count: 4,
            columns: vec![
                ColumnSchema::new("Date", SemanticType::Date),
                ColumnSchema::new("Category", SemanticType::Category),
                ColumnSchema::new("Revenue", SemanticType::Numeric),
                ColumnSchema::new("Spend", SemanticType::Numeric),
            ],
        }];
        let templates = detect_templates(&sheets);
        AnalysisResult { sheets, templates, fingerprint: "fp".into() }
    }

    struct Fixture {
        analysis: AnalysisResult,
        classifier: Arc<dyn IntentClassifier>,
        policy: Policy,
        conv: Conversation,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with(Arc::new(KeywordClassifier))
        }

        fn with(classifier: Arc<dyn IntentClassifier>) -> Self {
            let analysis = analysis();
            let conv = Conversation::new(generate(&analysis, 8), DateTime::<Utc>::UNIX_EPOCH);
            Self { analysis, classifier, policy: Policy::default(), conv }
        }

        fn send(&mut self, step: u64, answer: Answer) -> Result<Reply, CoreError> {
            self.conv.answer(
                Turn { step, answer },
                &self.classifier,
                &self.analysis.templates,
                &self.policy,
                DateTime::<Utc>::UNIX_EPOCH,
            )
        }

        fn text(&mut self, step: u64, text: &str) -> Result<Reply, CoreError> {
            self.send(step, Answer::FreeText(text.to_string()))
        }
    }

    struct NeverMatches;

    impl IntentClassifier for NeverMatches {
        fn classify(&self, _: &str, _: &[Template]) -> Result<Vec<TemplateMatch>, ClassifyError> {
            Ok(vec![TemplateMatch { template_id: "derive:Transactions:Profit_Margin".into(), confidence: 0.2 }])
        }
    }

    #[test]
    fn start_emits_first_question_at_step_one() {
        let mut f = Fixture::new();
        match f.conv.start(DateTime::<Utc>::UNIX_EPOCH) {
            Reply::Question { step, question, notice } => {
                assert_eq!(step, 1);
                assert_eq!(question.id, "derive:Transactions:Profit_Margin");
                assert!(notice.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.conv.state(), ConversationState::AwaitingAnswer);
    }

    #[test]
    fn no_questions_means_ready_immediately() {
        let mut conv = Conversation::new(Vec::new(), DateTime::<Utc>::UNIX_EPOCH);
        assert!(matches!(conv.start(DateTime::<Utc>::UNIX_EPOCH), Reply::ReadyToCompile { .. }));
        assert_eq!(conv.state(), ConversationState::ReadyToCompile);
    }

    #[test]
    fn each_accepted_answer_advances_one_step() {
        let mut f = Fixture::new();
        f.conv.start(DateTime::<Utc>::UNIX_EPOCH);
        f.send(1, Answer::YesNo(true)).unwrap();
        assert_eq!(f.conv.step(), 2);
        f.text(2, "no").unwrap();
        assert_eq!(f.conv.step(), 3);
        f.send(3, Answer::YesNo(true)).unwrap();
        f.send(4, Answer::YesNo(false)).unwrap();
        assert_eq!(f.conv.current_question().unwrap().question.id, "summarize:Transactions");
        f.send(5, Answer::Choice("option_1".into())).unwrap();
        assert_eq!(f.conv.step(), 6);
        assert_eq!(f.conv.requirements().len(), 5);
    }

    #[test]
    fn stale_step_is_rejected_without_change() {
        let mut f = Fixture::new();
        f.conv.start(DateTime::<Utc>::UNIX_EPOCH);
        f.send(1, Answer::YesNo(true)).unwrap();
        let before = f.conv.clone();

        let err = f.send(1, Answer::YesNo(true)).unwrap_err();
        assert_eq!(err, CoreError::StaleConversationStep { expected: 2, got: 1 });
        let err = f.send(7, Answer::YesNo(true)).unwrap_err();
        assert_eq!(err, CoreError::StaleConversationStep { expected: 2, got: 7 });

        assert_eq!(f.conv.step(), before.step());
        assert_eq!(f.conv.history(), before.history());
        assert_eq!(f.conv.requirements(), before.requirements());
    }

    #[test]
    fn free_text_intent_then_done() {
        let mut f = Fixture::new();
        f.conv.start(DateTime::<Utc>::UNIX_EPOCH);
        match f.text(1, "add a profit margin column").unwrap() {
            Reply::Question { step, question, notice } => {
                assert_eq!(step, 2);
                assert_eq!(question.id, "derive:Transactions:Net_Profit");
                assert!(notice.unwrap().starts_with("Added:"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match f.text(2, "done").unwrap() {
            Reply::ReadyToCompile { step, summary } => {
                assert_eq!(step, 3);
                assert_eq!(summary.intents, vec!["derive:Transactions:Profit_Margin".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn three_misses_fall_back() {
        let mut f = Fixture::with(Arc::new(NeverMatches));
        f.conv.start(DateTime::<Utc>::UNIX_EPOCH);

        for attempt in 1..3 {
            match f.text(1, "give me a summary by month").unwrap() {
                Reply::Question { step, notice, .. } => {
                    assert_eq!(step, 1);
                    assert!(notice.is_some());
                    assert_eq!(f.conv.retries(), attempt);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        match f.text(1, "give me a summary by month").unwrap() {
            Reply::Fallback { step, message } => {
                assert_eq!(step, 1);
                assert_eq!(message, "could not understand, no changes applied");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.conv.state(), ConversationState::ReadyToCompile);
        assert!(f.conv.plan().unwrap().is_fallback());
    }

    #[test]
    fn accepted_answer_resets_retries() {
        let mut f = Fixture::with(Arc::new(NeverMatches));
        f.conv.start(DateTime::<Utc>::UNIX_EPOCH);
        f.text(1, "blorp").unwrap();
        f.text(1, "blorp").unwrap();
        f.send(1, Answer::YesNo(false)).unwrap();
        assert_eq!(f.conv.retries(), 0);
        assert!(matches!(f.text(2, "blorp").unwrap(), Reply::Question { .. }));
    }

    #[test]
    fn answers_are_coerced_or_rejected_by_kind() {
        let mut f = Fixture::new();
        f.conv.start(DateTime::<Utc>::UNIX_EPOCH);
        // yes/no question accepts "yes" as text
        f.text(1, "Yes").unwrap();
        assert!(matches!(f.send(2, Answer::Choice("maybe".into())), Err(CoreError::InvalidAnswer(_))));
        f.send(2, Answer::YesNo(false)).unwrap();
        f.send(3, Answer::YesNo(false)).unwrap();
        f.send(4, Answer::YesNo(false)).unwrap();
        // multiple choice: unknown option rejected, "no" means none
        assert!(matches!(f.send(5, Answer::Choice("option_9".into())), Err(CoreError::InvalidAnswer(_))));
        assert_eq!(f.conv.step(), 5);
        f.text(5, "no").unwrap();
        assert_eq!(f.conv.step(), 6);
    }

    #[test]
    fn open_question_keeps_taking_requests() {
        let mut f = Fixture::new();
        f.conv.start(DateTime::<Utc>::UNIX_EPOCH);
        let mut step = 1;
        while f.conv.current_question().map(|q| q.question.id.as_str()) != Some(OPEN_QUESTION_ID) {
            f.send(step, Answer::YesNo(false)).unwrap();
            step += 1;
        }
        match f.text(step, "add a profit margin column").unwrap() {
            Reply::Question { question, .. } => assert_eq!(question.id, OPEN_QUESTION_ID),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(f.text(step + 1, "nothing").unwrap(), Reply::ReadyToCompile { .. }));
    }

    #[test]
    fn frozen_after_ready() {
        let mut f = Fixture::new();
        f.conv.start(DateTime::<Utc>::UNIX_EPOCH);
        f.text(1, "done").unwrap();
        assert!(matches!(f.send(2, Answer::YesNo(true)), Err(CoreError::InvalidAnswer(_))));
        assert!(f.conv.begin_compile().is_ok());
        assert!(matches!(f.conv.begin_compile(), Err(CoreError::NotReadyToCompile(_))));
        f.conv.compile_aborted();
        assert_eq!(f.conv.state(), ConversationState::ReadyToCompile);
    }

    #[test]
    fn idle_detection() {
        let f = Fixture::new();
        let timeout = Duration::from_secs(900);
        assert!(!f.conv.is_idle(DateTime::<Utc>::UNIX_EPOCH, timeout));
        let later = crate::clock::after(DateTime::<Utc>::UNIX_EPOCH, timeout);
        assert!(f.conv.is_idle(later, timeout));
    }
}
