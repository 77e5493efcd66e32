//! Intent classification — keyword heuristics over resolved entities.
//!
//! The heuristic classifier is total: unmappable messages always land in
//! `GeneralQuery`, never in an error. An external model may be consulted as
//! a second opinion through [`IntentArbiter`], but the deterministic path
//! never depends on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::RankingFilters;

/// One query intent per turn: freshly classified, or inherited from the
/// session scope when the message carries no resolvable entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    StudentQuery,
    CompareQuery,
    MultiStudentQuery,
    ClassQuery,
    RankingQuery,
    GeneralQuery,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::StudentQuery => "student_query",
            Self::CompareQuery => "compare_query",
            Self::MultiStudentQuery => "multi_student_query",
            Self::ClassQuery => "class_query",
            Self::RankingQuery => "ranking_query",
            Self::GeneralQuery => "general_query",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "student_query" => Some(Self::StudentQuery),
            "compare_query" => Some(Self::CompareQuery),
            "multi_student_query" => Some(Self::MultiStudentQuery),
            "class_query" => Some(Self::ClassQuery),
            "ranking_query" => Some(Self::RankingQuery),
            "general_query" => Some(Self::GeneralQuery),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Entities resolved from the current message, in order of first mention.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedEntities {
    pub students: Vec<String>,
    pub class_id: Option<String>,
}

impl ResolvedEntities {
    pub fn is_empty(&self) -> bool {
        self.students.is_empty() && self.class_id.is_none()
    }
}

const RANKING_WORDS: &[&str] = &[
    "rank", "ranking", "top", "best", "worst", "lowest", "highest", "bottom",
];

const COMPARISON_WORDS: &[&str] = &["compare", "vs", "versus"];
const COMPARISON_PHRASES: &[&str] = &["difference between"];

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

fn has_ranking_keyword(lower: &str) -> bool {
    RANKING_WORDS.iter().any(|w| contains_word(lower, w))
}

fn has_comparison_keyword(lower: &str) -> bool {
    COMPARISON_WORDS.iter().any(|w| contains_word(lower, w))
        || COMPARISON_PHRASES.iter().any(|p| lower.contains(p))
}

/// Classify a message given its resolved entities. First match wins:
/// ranking keywords, then an explicit comparison keyword over two or more
/// students, then one student, two students by bare juxtaposition, more
/// than two students, a class id, and finally the general default.
pub fn classify(message: &str, entities: &ResolvedEntities) -> Intent {
    let lower = message.to_lowercase();
    if has_ranking_keyword(&lower) {
        return Intent::RankingQuery;
    }
    if entities.students.len() >= 2 && has_comparison_keyword(&lower) {
        return Intent::CompareQuery;
    }
    match entities.students.len() {
        1 => return Intent::StudentQuery,
        2 => return Intent::CompareQuery,
        n if n > 2 => return Intent::MultiStudentQuery,
        _ => {}
    }
    if entities.class_id.is_some() {
        return Intent::ClassQuery;
    }
    Intent::GeneralQuery
}

/// Extract ranking filters from a message: "top 3", "bottom"/"lowest"
/// direction, and a "last N weeks" window.
pub fn ranking_filters(message: &str, class_id: Option<String>) -> RankingFilters {
    let lower = message.to_lowercase();
    let mut filters = RankingFilters {
        class_id,
        ..RankingFilters::default()
    };
    if ["bottom", "lowest", "worst"]
        .iter()
        .any(|w| contains_word(&lower, w))
    {
        filters.ascending = true;
    }

    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    for window in tokens.windows(2) {
        if ["top", "bottom", "best", "worst"].contains(&window[0]) {
            if let Ok(n) = window[1].parse::<usize>() {
                if n > 0 {
                    filters.limit = n;
                }
            }
        }
    }
    // "last N weeks"
    for window in tokens.windows(3) {
        if window[0] == "last" && window[2].starts_with("week") {
            if let Ok(n) = window[1].parse::<u32>() {
                filters.last_weeks = Some(n);
            }
        }
    }
    filters
}

/// Optional second-opinion intent classifier backed by an external model.
/// Consulted at most once per turn; its output is advisory.
#[async_trait]
pub trait IntentArbiter: Send + Sync {
    async fn confirm(&self, message: &str, heuristic: Intent) -> Result<Intent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn students(names: &[&str]) -> ResolvedEntities {
        ResolvedEntities {
            students: names.iter().map(|n| n.to_string()).collect(),
            class_id: None,
        }
    }

    #[test]
    fn test_single_student() {
        assert_eq!(
            classify("How is Aisha doing?", &students(&["Aisha"])),
            Intent::StudentQuery
        );
    }

    #[test]
    fn test_two_students_with_keyword() {
        assert_eq!(
            classify("Compare Adam and Zoe", &students(&["Adam", "Zoe"])),
            Intent::CompareQuery
        );
    }

    #[test]
    fn test_two_students_bare_juxtaposition() {
        assert_eq!(
            classify("Adam and Zoe this week?", &students(&["Adam", "Zoe"])),
            Intent::CompareQuery
        );
    }

    #[test]
    fn test_comparison_keyword_wins_over_multi() {
        assert_eq!(
            classify(
                "Compare Adam, Zoe and Aisha",
                &students(&["Adam", "Zoe", "Aisha"])
            ),
            Intent::CompareQuery
        );
        assert_eq!(
            classify(
                "What's the difference between Adam and Zoe?",
                &students(&["Adam", "Zoe"])
            ),
            Intent::CompareQuery
        );
    }

    #[test]
    fn test_many_students() {
        assert_eq!(
            classify(
                "How are Adam, Zoe and Aisha doing?",
                &students(&["Adam", "Zoe", "Aisha"])
            ),
            Intent::MultiStudentQuery
        );
    }

    #[test]
    fn test_ranking_wins_over_entities() {
        assert_eq!(
            classify("Who are the top 5 in 4B?", &students(&["Adam"])),
            Intent::RankingQuery
        );
    }

    #[test]
    fn test_class_only() {
        let entities = ResolvedEntities {
            students: vec![],
            class_id: Some("4B".into()),
        };
        assert_eq!(classify("How is 4B trending?", &entities), Intent::ClassQuery);
    }

    #[test]
    fn test_general_default() {
        assert_eq!(
            classify("What does the Delta column mean?", &ResolvedEntities::default()),
            Intent::GeneralQuery
        );
    }

    #[test]
    fn test_vs_does_not_match_inside_names() {
        // "Davis" contains "vs" but should not look like a comparison.
        assert_eq!(
            classify("How is Davis doing?", &students(&["Davis"])),
            Intent::StudentQuery
        );
    }

    #[test]
    fn test_ranking_filters_extraction() {
        let f = ranking_filters("Show the bottom 3 for the last 4 weeks", Some("4B".into()));
        assert!(f.ascending);
        assert_eq!(f.limit, 3);
        assert_eq!(f.last_weeks, Some(4));
        assert_eq!(f.class_id.as_deref(), Some("4B"));
    }

    #[test]
    fn test_ranking_filters_defaults() {
        let f = ranking_filters("rank the students", None);
        assert!(!f.ascending);
        assert_eq!(f.limit, 5);
        assert_eq!(f.last_weeks, None);
    }

    #[test]
    fn test_intent_labels_roundtrip() {
        for intent in [
            Intent::StudentQuery,
            Intent::CompareQuery,
            Intent::MultiStudentQuery,
            Intent::ClassQuery,
            Intent::RankingQuery,
            Intent::GeneralQuery,
        ] {
            assert_eq!(Intent::from_label(intent.label()), Some(intent));
        }
    }
}
