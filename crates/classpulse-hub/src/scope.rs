//! Scope memory — the replace-or-reuse state machine for the conversation
//! topic.
//!
//! A turn with resolved entities replaces the session scope wholesale; an
//! entity-free follow-up reuses the prior scope verbatim, which is what lets
//! "What does the Delta column mean?" resolve correctly after a comparison.

use tracing::{debug, warn};

use classpulse_core::intent::{Intent, ResolvedEntities};
use classpulse_core::session::{RankingFilters, Scope, SessionState};

/// How many students a multi-student scope keeps at most.
const MULTI_SCOPE_LIMIT: usize = 5;

/// What the scope update decided for this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeDecision {
    /// New entities replaced the previous scope wholesale.
    Replaced(Scope),
    /// Entity-free follow-up; the prior scope is reused verbatim.
    Reused(Scope),
    /// No entities and no prior scope; the general default applies.
    Defaulted,
}

impl ScopeDecision {
    /// The intent effectively active for the turn.
    pub fn effective_intent(&self, classified: Intent) -> Intent {
        match self {
            Self::Replaced(_) => classified,
            Self::Reused(scope) => scope.intent(),
            Self::Defaulted => Intent::GeneralQuery,
        }
    }
}

/// Build the scope a turn's intent and entities describe, if any.
fn scope_from(
    intent: Intent,
    entities: &ResolvedEntities,
    filters: Option<&RankingFilters>,
) -> Option<Scope> {
    match intent {
        Intent::CompareQuery if entities.students.len() >= 2 => Some(Scope::Compare {
            first: entities.students[0].clone(),
            second: entities.students[1].clone(),
        }),
        Intent::MultiStudentQuery if entities.students.len() >= 2 => Some(Scope::Multi {
            names: entities
                .students
                .iter()
                .take(MULTI_SCOPE_LIMIT)
                .cloned()
                .collect(),
        }),
        Intent::StudentQuery if !entities.students.is_empty() => Some(Scope::Student {
            name: entities.students[0].clone(),
        }),
        Intent::ClassQuery => entities
            .class_id
            .clone()
            .map(|id| Scope::Class { id }),
        Intent::RankingQuery => Some(Scope::Ranking {
            filters: filters.cloned().unwrap_or_default(),
        }),
        _ => None,
    }
}

/// Apply one turn to the session scope. Entities replace, silence reuses,
/// and a blank slate stays on the general default. Never fails.
pub fn update(
    state: &mut SessionState,
    intent: Intent,
    entities: &ResolvedEntities,
    filters: Option<&RankingFilters>,
) -> ScopeDecision {
    if let Some(scope) = scope_from(intent, entities, filters) {
        debug!(?scope, "scope replaced");
        state.scope = scope.clone();
        return ScopeDecision::Replaced(scope);
    }
    if state.scope == Scope::General {
        return ScopeDecision::Defaulted;
    }
    debug!(scope = ?state.scope, "scope reused for follow-up");
    ScopeDecision::Reused(state.scope.clone())
}

/// Reset a scope that no longer describes anything resolvable (empty names
/// from a corrupted store entry) back to the general default.
pub fn sanitize(state: &mut SessionState) {
    let valid = match &state.scope {
        Scope::General => true,
        Scope::Student { name } => !name.trim().is_empty(),
        Scope::Class { id } => !id.trim().is_empty(),
        Scope::Compare { first, second } => {
            !first.trim().is_empty() && !second.trim().is_empty()
        }
        Scope::Multi { names } => !names.is_empty() && names.iter().all(|n| !n.trim().is_empty()),
        Scope::Ranking { filters } => filters.limit > 0,
    };
    if !valid {
        warn!(scope = ?state.scope, "stored scope invalid; resetting to general");
        state.scope = Scope::General;
    }
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
    fn test_entities_replace_scope() {
        let mut state = SessionState::new();
        state.scope = Scope::Student {
            name: "Aisha".into(),
        };
        let decision = update(
            &mut state,
            Intent::CompareQuery,
            &students(&["Adam", "Zoe"]),
            None,
        );
        let expected = Scope::Compare {
            first: "Adam".into(),
            second: "Zoe".into(),
        };
        assert_eq!(decision, ScopeDecision::Replaced(expected.clone()));
        assert_eq!(state.scope, expected);
    }

    #[test]
    fn test_entity_free_turn_reuses_scope() {
        let mut state = SessionState::new();
        state.scope = Scope::Compare {
            first: "Adam".into(),
            second: "Zoe".into(),
        };
        let before = state.scope.clone();
        let decision = update(
            &mut state,
            Intent::GeneralQuery,
            &ResolvedEntities::default(),
            None,
        );
        assert_eq!(decision, ScopeDecision::Reused(before.clone()));
        assert_eq!(state.scope, before);
        assert_eq!(decision.effective_intent(Intent::GeneralQuery), Intent::CompareQuery);
    }

    #[test]
    fn test_blank_slate_defaults_to_general() {
        let mut state = SessionState::new();
        let decision = update(
            &mut state,
            Intent::GeneralQuery,
            &ResolvedEntities::default(),
            None,
        );
        assert_eq!(decision, ScopeDecision::Defaulted);
        assert_eq!(state.scope, Scope::General);
    }

    #[test]
    fn test_ranking_without_entities_still_replaces() {
        let mut state = SessionState::new();
        let filters = RankingFilters {
            ascending: true,
            limit: 3,
            ..RankingFilters::default()
        };
        let decision = update(
            &mut state,
            Intent::RankingQuery,
            &ResolvedEntities::default(),
            Some(&filters),
        );
        assert_eq!(
            decision,
            ScopeDecision::Replaced(Scope::Ranking {
                filters: filters.clone()
            })
        );
    }

    #[test]
    fn test_sanitize_resets_corrupted_scope() {
        let mut state = SessionState::new();
        state.scope = Scope::Compare {
            first: String::new(),
            second: "Zoe".into(),
        };
        sanitize(&mut state);
        assert_eq!(state.scope, Scope::General);

        state.scope = Scope::Student {
            name: "Aisha".into(),
        };
        sanitize(&mut state);
        assert!(matches!(state.scope, Scope::Student { .. }));
    }
}
