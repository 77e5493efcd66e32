//! Session state — intent-scoped conversational memory for one conversation.

use serde::{Deserialize, Serialize};

use crate::intent::Intent;
use crate::message::ChatTurn;

/// Maximum history entries kept per session. Oldest entries are dropped
/// first once the bound is exceeded.
pub const HISTORY_LIMIT: usize = 50;

/// Filters attached to a ranking query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingFilters {
    pub class_id: Option<String>,
    pub concept: Option<String>,
    /// "last N weeks" window, if the message asked for one.
    pub last_weeks: Option<u32>,
    /// Sort ascending ("bottom"/"lowest") instead of descending.
    #[serde(default)]
    pub ascending: bool,
    /// Requested number of entries.
    #[serde(default = "default_ranking_limit")]
    pub limit: usize,
}

fn default_ranking_limit() -> usize {
    5
}

impl Default for RankingFilters {
    fn default() -> Self {
        Self {
            class_id: None,
            concept: None,
            last_weeks: None,
            ascending: false,
            limit: default_ranking_limit(),
        }
    }
}

/// The current conversational topic for a session.
///
/// Follow-up turns that carry no resolvable entities reuse the stored scope
/// verbatim; turns with entities replace it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    #[default]
    General,
    Student {
        name: String,
    },
    Class {
        id: String,
    },
    Compare {
        first: String,
        second: String,
    },
    Multi {
        names: Vec<String>,
    },
    Ranking {
        filters: RankingFilters,
    },
}

impl Scope {
    /// The intent a turn inherits when it reuses this scope.
    pub fn intent(&self) -> Intent {
        match self {
            Self::General => Intent::GeneralQuery,
            Self::Student { .. } => Intent::StudentQuery,
            Self::Class { .. } => Intent::ClassQuery,
            Self::Compare { .. } => Intent::CompareQuery,
            Self::Multi { .. } => Intent::MultiStudentQuery,
            Self::Ranking { .. } => Intent::RankingQuery,
        }
    }
}

/// Per-session conversation state, serialized into the session store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub dissatisfaction_count: u32,
    /// Monotonic within a session: once true, never reset except by a full
    /// session reset or store expiry.
    #[serde(default)]
    pub escalated: bool,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, evicting the oldest entries past the history bound.
    pub fn push_turn(&mut self, turn: ChatTurn) {
        self.history.push(turn);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    /// The most recent `limit` turns, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[ChatTurn] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }
}
