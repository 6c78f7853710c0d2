// Case/punctuation-insensitive name resolution

use strsim::jaro_winkler;

use crate::text::normalize;

/// Outcome of resolving a name against known candidates.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Exact(String),
    /// Matched after normalization or by similarity.
    Corrected(String),
    /// Nothing cleared the threshold; closest candidates first.
    Missing { suggestions: Vec<String> },
}

/// Resolve `wanted` among `candidates`.
///
/// Exact match first, then equal normalized forms ("profit margin" vs
/// "Profit_Margin"), then the best Jaro-Winkler similarity over normalized
/// forms at or above `threshold`. Ties keep candidate order.
pub fn resolve<'a, I>(wanted: &str, candidates: I, threshold: f64) -> Resolved
where
    I: IntoIterator<Item = &'a str>,
{
    let candidates: Vec<&str> = candidates.into_iter().collect();
    if let Some(hit) = candidates.iter().find(|c| **c == wanted) {
        return Resolved::Exact(hit.to_string());
    }

    let key = normalize(wanted);
    if let Some(hit) = candidates.iter().find(|c| normalize(c) == key) {
        return Resolved::Corrected(hit.to_string());
    }

    let mut scored: Vec<(f64, &str)> =
        candidates.iter().map(|c| (jaro_winkler(&key, &normalize(c)), *c)).collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    match scored.first() {
        Some((score, best)) if *score >= threshold => Resolved::Corrected(best.to_string()),
        _ => Resolved::Missing {
            suggestions: scored
                .iter()
                .filter(|(score, _)| *score >= 0.5)
                .take(3)
                .map(|(_, c)| c.to_string())
                .collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[&str] = &["Date", "Revenue", "Spend", "Campaign_ID"];

    #[test]
    fn exact_wins() {
        assert_eq!(resolve("Spend", COLUMNS.iter().copied(), 0.85), Resolved::Exact("Spend".into()));
    }

    #[test]
    fn case_and_punctuation() {
        assert_eq!(resolve("revenue", COLUMNS.iter().copied(), 0.85), Resolved::Corrected("Revenue".into()));
        assert_eq!(resolve("campaign id", COLUMNS.iter().copied(), 0.85), Resolved::Corrected("Campaign_ID".into()));
    }

    #[test]
    fn typo_within_threshold() {
        assert_eq!(resolve("Revenu", COLUMNS.iter().copied(), 0.85), Resolved::Corrected("Revenue".into()));
    }

    #[test]
    fn unrelated_name_misses() {
        match resolve("Headcount", COLUMNS.iter().copied(), 0.85) {
            Resolved::Missing { suggestions } => assert!(suggestions.len() <= 3),
            other => panic!("expected miss, got {other:?}"),
        }
    }
}
