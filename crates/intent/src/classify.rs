//! Intent classifier boundary.
//!
//! A classifier ranks the canonical templates against a free-text
//! utterance. Calls are bounded by a timeout; a timeout or failure is the
//! same as no match.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::model::Template;
use crate::text::{contains_phrase, tokens};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatch {
    pub template_id: String,
    /// 0.0 to 1.0.
    pub confidence: f64,
}

pub trait IntentClassifier: Send + Sync {
    /// Ranked matches, best first. May be empty.
    fn classify(&self, utterance: &str, templates: &[Template]) -> Result<Vec<TemplateMatch>, ClassifyError>;
}

/// Best match at or above `threshold`. Equal confidences keep ranking order.
pub fn best_match(matches: &[TemplateMatch], threshold: f64) -> Option<&TemplateMatch> {
    matches
        .iter()
        .filter(|m| m.confidence >= threshold)
        .fold(None, |best: Option<&TemplateMatch>, m| match best {
            Some(b) if b.confidence >= m.confidence => Some(b),
            _ => Some(m),
        })
}

/// Run `classifier` on a worker thread, waiting at most `timeout`.
///
/// A late worker is left to finish on its own; its result is dropped.
pub fn classify_with_timeout(
    classifier: Arc<dyn IntentClassifier>,
    utterance: &str,
    templates: &[Template],
    timeout: Duration,
) -> Result<Vec<TemplateMatch>, ClassifyError> {
    let (tx, rx) = mpsc::channel();
    let utterance = utterance.to_string();
    let templates = templates.to_vec();

    thread::Builder::new()
        .name("intent-classifier".into())
        .spawn(move || {
            let _ = tx.send(classifier.classify(&utterance, &templates));
        })
        .map_err(|e| ClassifyError::Failed(format!("failed to spawn classifier: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            log::warn!("intent classifier timed out after {}ms", timeout.as_millis());
            Err(ClassifyError::Timeout)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(ClassifyError::Failed("classifier worker exited without a result".into()))
        }
    }
}

// ============================================================================
// Keyword classifier
// ============================================================================

/// Offline classifier: trigger phrases plus mentions of the template's
/// sheet and columns.
///
/// Score is 0.5 + 0.2 per word of the longest trigger phrase found
/// (capped at 0.9), plus up to 0.1 for subject mentions. No trigger, no
/// match. A two-word trigger ("profit margin") clears the default 0.6
/// threshold comfortably; one bare word lands at 0.7.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    fn score(words: &[String], template: &Template) -> Option<f64> {
        let longest = template
            .triggers
            .iter()
            .map(|t| tokens(t))
            .filter(|t| contains_phrase(words, t))
            .map(|t| t.len())
            .max()?;

        let base = (0.5 + 0.2 * longest as f64).min(0.9);
        let mentioned = template
            .subjects
            .iter()
            .filter(|s| contains_phrase(words, &tokens(s)))
            .count();
        let bonus = if template.subjects.is_empty() {
            0.0
        } else {
            0.1 * mentioned as f64 / template.subjects.len() as f64
        };
        Some((base + bonus).min(1.0))
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, utterance: &str, templates: &[Template]) -> Result<Vec<TemplateMatch>, ClassifyError> {
        let words = tokens(utterance);
        let mut matches: Vec<TemplateMatch> = templates
            .iter()
            .filter_map(|t| {
                Self::score(&words, t).map(|confidence| TemplateMatch { template_id: t.id.clone(), confidence })
            })
            .collect();
        // Stable: ties keep template order
        matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(matches)
    }
}
