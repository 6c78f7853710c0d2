// Token helpers shared by analysis, classification and fuzzy matching

/// Lowercase word tokens. Splits on non-alphanumerics and on camelCase
/// boundaries: "CampaignID" and "campaign_id" both give ["campaign", "id"].
pub fn tokens(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in s.chars() {
        if !ch.is_alphanumeric() {
            flush(&mut out, &mut current);
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            flush(&mut out, &mut current);
        }
        prev_lower = ch.is_lowercase() || ch.is_numeric();
        current.extend(ch.to_lowercase());
    }
    flush(&mut out, &mut current);
    out
}

fn flush(out: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        out.push(std::mem::take(current));
    }
}

/// Case and punctuation-insensitive form: "Profit Margin" → "profitmargin".
pub fn normalize(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

/// True when `needle` occurs as a contiguous token run in `haystack`.
pub fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Any token of `name` is one of `words` (tolerating a plural "s").
pub fn mentions_any(name: &str, words: &[&str]) -> bool {
    tokens(name).iter().any(|t| {
        let singular = t.strip_suffix('s').unwrap_or(t);
        words.iter().any(|w| t == w || singular == *w)
    })
}

/// `base`, or `base_2`, `base_3`... whichever is free.
pub fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|c| !taken(c))
        .unwrap_or_else(|| base.to_string())
}
