//! Entity resolver — fuzzy matching of free-text names against a roster.

use tracing::debug;

/// Minimum normalized similarity for a fuzzy suggestion.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// Top candidates scored within this distance of each other are reported as
/// ambiguous instead of silently picking the first.
pub const AMBIGUITY_EPSILON: f64 = 0.05;

const MAX_SUGGESTIONS: usize = 3;

/// Which roster a fragment is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterKind {
    Student,
    Class,
}

/// Outcome of resolving one free-text fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    /// Case-insensitive, whitespace-trimmed exact match. No ambiguity.
    Exact(String),
    /// Fuzzy candidates over the threshold, best first.
    Suggestions(Vec<String>),
    /// Top candidates scored too close to call; the caller should ask.
    Ambiguous(Vec<String>),
    NotFound,
}

/// Resolve a free-text fragment against a roster.
///
/// Exact match (case-insensitive, trimmed) wins immediately. Otherwise up to
/// three candidates with normalized edit-distance similarity over the
/// threshold are returned in decreasing similarity, ties broken by roster
/// order. Empty input never errors; it simply resolves to `NotFound`.
pub fn resolve(text: &str, roster: &[String], kind: RosterKind) -> MatchResult {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return MatchResult::NotFound;
    }

    for entry in roster {
        if entry.trim().to_lowercase() == needle {
            return MatchResult::Exact(entry.clone());
        }
    }

    let mut scored: Vec<(f64, &String)> = Vec::new();
    for entry in roster {
        let score = similarity(&needle, &entry.trim().to_lowercase());
        if score >= SIMILARITY_THRESHOLD {
            scored.push((score, entry));
        }
    }
    if scored.is_empty() {
        return MatchResult::NotFound;
    }

    // Stable sort keeps roster order for equal scores.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let ambiguous = scored.len() > 1 && (scored[0].0 - scored[1].0) < AMBIGUITY_EPSILON;
    let names: Vec<String> = scored
        .iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, name)| (*name).clone())
        .collect();

    debug!(?kind, candidates = names.len(), ambiguous, "fuzzy roster match");
    if ambiguous {
        MatchResult::Ambiguous(names)
    } else {
        MatchResult::Suggestions(names)
    }
}

/// Roster names mentioned verbatim in a message, ordered by first occurrence.
pub fn find_mentions(message: &str, roster: &[String]) -> Vec<String> {
    let lower = message.to_lowercase();
    let mut hits: Vec<(usize, String)> = Vec::new();
    for entry in roster {
        let name = entry.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        if let Some(pos) = lower.find(&name) {
            hits.push((pos, entry.clone()));
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, name)| name).collect()
}

/// Normalized similarity in [0, 1] from Levenshtein distance.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
