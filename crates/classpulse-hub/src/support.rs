//! Dissatisfaction tracking and support escalation.
//!
//! Detects dissatisfaction signals in instructor messages, counts them per
//! session, and fires a deterministic escalation once the threshold is
//! crossed. The language model is never part of this path; it is only told
//! afterward that the escalation happened.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use classpulse_core::error::{ClassPulseError, Result};
use classpulse_core::message::ChatTurn;
use classpulse_core::session::SessionState;

/// Default number of dissatisfaction signals before auto-escalation.
pub const ESCALATION_THRESHOLD: u32 = 3;

/// Phrases that signal instructor dissatisfaction (case-insensitive).
const DISSATISFACTION_KEYWORDS: &[&str] = &[
    "not satisfied",
    "doesn't help",
    "still wrong",
    "not working",
    "i need help",
    "speak to someone",
    "talk to support",
    "contact support",
    "human support",
    "this is wrong",
    "not what i asked",
    "doesn't answer",
    "not clear",
    "unclear",
    "confusing",
    "frustrated",
    "not helpful",
];

/// Whether a message carries a dissatisfaction signal. A message matching
/// several keywords still counts as a single signal.
pub fn detect_dissatisfaction(message: &str) -> bool {
    let lower = message.to_lowercase();
    DISSATISFACTION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// What the tracker decided for one observed message.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationDecision {
    /// No dissatisfaction signal this turn.
    None,
    /// Signal counted; below threshold, or the session already escalated.
    Counted { count: u32 },
    /// Threshold crossed for the first time; a ticket must be filed.
    Fire { count: u32 },
}

/// Observe one message: count at most one signal and decide whether the
/// escalation fires. Mutates the session counters; the caller commits the
/// state and the ticket submission together.
pub fn observe(state: &mut SessionState, message: &str, threshold: u32) -> EscalationDecision {
    if !detect_dissatisfaction(message) {
        return EscalationDecision::None;
    }
    state.dissatisfaction_count += 1;
    let count = state.dissatisfaction_count;
    if count >= threshold && !state.escalated {
        state.escalated = true;
        info!(count, "dissatisfaction threshold crossed; escalating");
        EscalationDecision::Fire { count }
    } else {
        info!(count, escalated = state.escalated, "dissatisfaction signal counted");
        EscalationDecision::Counted { count }
    }
}

/// Who the ticket is about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

/// Everything the support team needs to pick up a session.
#[derive(Debug, Clone, Serialize)]
pub struct TicketPayload {
    pub session_id: String,
    pub user: UserIdentity,
    pub issue_summary: String,
    pub history: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
}

impl TicketPayload {
    pub fn new(
        session_id: &str,
        user: UserIdentity,
        state: &SessionState,
        signal_count: u32,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            user,
            issue_summary: format!(
                "Instructor dissatisfaction after {} signals",
                signal_count
            ),
            history: state.history.clone(),
            created_at: Utc::now(),
        }
    }

    /// Render the conversation transcript attached to the ticket.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        out.push_str("CLASSPULSE INSTRUCTOR ASSISTANT - SUPPORT TICKET\n\n");
        out.push_str(&format!("Session: {}\n", self.session_id));
        out.push_str(&format!("Created: {}\n", self.created_at.to_rfc3339()));
        out.push_str(&format!("Instructor: {} <{}>\n", self.user.name, self.user.email));
        out.push_str(&format!("Summary: {}\n\n", self.issue_summary));
        out.push_str("CONVERSATION HISTORY\n\n");
        for (i, turn) in self.history.iter().enumerate() {
            out.push_str(&format!(
                "[{}] {}:\n{}\n\n",
                i + 1,
                turn.role.as_str().to_uppercase(),
                turn.content
            ));
        }
        out
    }
}

/// Ticket delivery collaborator. The orchestrator guarantees at-most-one
/// submit per escalation via the session's `escalated` flag; sinks do not
/// need to deduplicate.
#[async_trait]
pub trait TicketSink: Send + Sync {
    /// Deliver a ticket; returns the assigned ticket id.
    async fn submit(&self, payload: &TicketPayload) -> Result<String>;
}

fn ticket_id(session_id: &str, created_at: DateTime<Utc>) -> String {
    format!("TICKET-{}-{}", session_id, created_at.format("%Y%m%d%H%M%S"))
}

/// Writes ticket transcripts to a local directory, one file per ticket.
pub struct FileTicketSink {
    dir: PathBuf,
}

impl FileTicketSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TicketSink for FileTicketSink {
    async fn submit(&self, payload: &TicketPayload) -> Result<String> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ClassPulseError::Ticket(format!("ticket dir: {}", e)))?;
        let id = ticket_id(&payload.session_id, payload.created_at);
        let path = self.dir.join(format!("{}.txt", id));
        std::fs::write(&path, payload.transcript())
            .map_err(|e| ClassPulseError::Ticket(format!("write ticket: {}", e)))?;
        info!(ticket = %id, path = %path.display(), "support ticket written");
        Ok(id)
    }
}

/// Development sink: logs the ticket instead of delivering it anywhere.
pub struct LogTicketSink;

#[async_trait]
impl TicketSink for LogTicketSink {
    async fn submit(&self, payload: &TicketPayload) -> Result<String> {
        let id = ticket_id(&payload.session_id, payload.created_at);
        warn!(
            ticket = %id,
            user = %payload.user.email,
            turns = payload.history.len(),
            "ticket delivery not configured - logging ticket: {}",
            payload.issue_summary
        );
        Ok(id)
    }
}
