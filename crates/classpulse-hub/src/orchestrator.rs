//! Conversation orchestrator — one entry point per instructor turn.
//!
//! Sequences a turn end to end: dissatisfaction tracking, entity
//! resolution, intent classification, scope update, grounding, and the
//! provider call. Everything except the final reply text is deterministic;
//! the model never decides whether to escalate, what the scope is, or what
//! the data says.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use classpulse_core::config::ClassPulseConfig;
use classpulse_core::dataset::DatasetProvider;
use classpulse_core::error::Result;
use classpulse_core::intent::{self, Intent, IntentArbiter, ResolvedEntities};
use classpulse_core::message::ChatTurn;
use classpulse_core::provider::{CompletionRequest, LlmProvider};
use classpulse_core::resolver::{self, MatchResult, RosterKind};
use classpulse_core::session::{RankingFilters, Scope, SessionState, HISTORY_LIMIT};
use classpulse_core::store::SessionStore;

use crate::grounding;
use crate::scope::{self, ScopeDecision};
use crate::support::{self, EscalationDecision, TicketPayload, TicketSink, UserIdentity};

const SYSTEM_INSTRUCTIONS: &str = "\
You are ClassPulse, an assistant for instructors reviewing student activity \
data. Answer using only the conversation and the [DATA CONTEXT] block when \
one is present; never invent numbers that are not in the data. Be concise \
and concrete, and refer to students by the names the instructor used.";

const LLM_UNAVAILABLE_REPLY: &str = "\
I'm having trouble reaching the language model right now. Please try again \
in a moment; your conversation and its subject are saved.";

const DATA_UNAVAILABLE_REPLY: &str = "\
I couldn't read the activity data just now. Please try again in a moment.";

/// Everything the API layer needs to answer one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub intent: String,
    pub scope: Scope,
    pub dissatisfaction_count: u32,
    pub escalated: bool,
    /// Set only on the turn that filed the ticket.
    pub ticket_id: Option<String>,
    /// True when the reply is a degraded stand-in rather than a grounded
    /// model answer.
    pub degraded: bool,
}

/// Tunables lifted out of the full config.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub session_ttl: Duration,
    pub escalation_threshold: u32,
    pub llm_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ClassPulseConfig) -> Self {
        Self {
            session_ttl: Duration::from_secs(config.session.ttl_days * 24 * 60 * 60),
            escalation_threshold: config.escalation.threshold,
            llm_timeout: Duration::from_secs(config.provider.timeout_secs),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&ClassPulseConfig::default())
    }
}

enum EntityResolution {
    Resolved(ResolvedEntities),
    /// The turn should short-circuit with this clarification question.
    NeedsClarification(String),
}

pub struct Orchestrator {
    dataset: Arc<dyn DatasetProvider>,
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn LlmProvider>,
    tickets: Arc<dyn TicketSink>,
    arbiter: Option<Arc<dyn IntentArbiter>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        dataset: Arc<dyn DatasetProvider>,
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn LlmProvider>,
        tickets: Arc<dyn TicketSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            dataset,
            store,
            provider,
            tickets,
            arbiter: None,
            settings,
        }
    }

    /// Attach a second-opinion intent classifier. Optional; the heuristic
    /// path works without it.
    pub fn with_arbiter(mut self, arbiter: Arc<dyn IntentArbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Handle one instructor turn for a session.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        user: &UserIdentity,
        message: &str,
    ) -> Result<TurnOutcome> {
        let loaded = self.store.get(session_id).await?;
        let mut state = loaded.clone().unwrap_or_default();
        scope::sanitize(&mut state);

        // History snapshot for the prompt, before this turn is appended.
        let prior_history: Vec<ChatTurn> = state.recent_history(HISTORY_LIMIT).to_vec();
        // Turns appended during this turn, kept separately so a contended
        // write can replay exactly them onto the winner's state.
        let user_turn = ChatTurn::user(message);
        state.push_turn(user_turn.clone());
        let mut appended = vec![user_turn];

        // Dissatisfaction is tracked on every message, before anything can
        // short-circuit the turn, and entirely without the model. A firing
        // turn is answered with the acknowledgement alone and leaves the
        // scope as it was, even if the message names entities.
        let escalation = support::observe(&mut state, message, self.settings.escalation_threshold);
        if let EscalationDecision::Fire { count } = escalation {
            return self
                .escalate(session_id, user, message, loaded, state, count)
                .await;
        }

        // Entity resolution against the live rosters. A misspelling turns
        // into a clarification question instead of a wrong answer.
        let entities = match self.resolve_entities(message).await {
            Ok(EntityResolution::Resolved(entities)) => entities,
            Ok(EntityResolution::NeedsClarification(question)) => {
                let reply_turn = ChatTurn::assistant(&question);
                state.push_turn(reply_turn.clone());
                appended.push(reply_turn);
                self.persist(session_id, loaded.as_ref(), state.clone(), &appended)
                    .await;
                return Ok(TurnOutcome {
                    reply: question,
                    intent: Intent::GeneralQuery.label().to_string(),
                    scope: state.scope,
                    dissatisfaction_count: state.dissatisfaction_count,
                    escalated: state.escalated,
                    ticket_id: None,
                    degraded: false,
                });
            }
            Err(e) => {
                warn!(session = session_id, error = %e, "entity resolution failed; degrading");
                let reply_turn = ChatTurn::assistant(DATA_UNAVAILABLE_REPLY);
                state.push_turn(reply_turn.clone());
                appended.push(reply_turn);
                self.persist(session_id, loaded.as_ref(), state.clone(), &appended)
                    .await;
                return Ok(TurnOutcome {
                    reply: DATA_UNAVAILABLE_REPLY.to_string(),
                    intent: Intent::GeneralQuery.label().to_string(),
                    scope: state.scope,
                    dissatisfaction_count: state.dissatisfaction_count,
                    escalated: state.escalated,
                    ticket_id: None,
                    degraded: true,
                });
            }
        };

        let mut classified = intent::classify(message, &entities);
        if classified == Intent::GeneralQuery
            && state.scope == Scope::General
            && entities.is_empty()
        {
            classified = self.consult_arbiter(message, classified).await;
        }
        let filters: Option<RankingFilters> = (classified == Intent::RankingQuery)
            .then(|| intent::ranking_filters(message, entities.class_id.clone()));

        let decision = scope::update(&mut state, classified, &entities, filters.as_ref());
        let effective = decision.effective_intent(classified);
        info!(
            session = session_id,
            classified = %classified,
            effective = %effective,
            reused = matches!(decision, ScopeDecision::Reused(_)),
            "turn classified"
        );

        // Grounding is rebuilt from the dataset every turn.
        let block = match grounding::build(self.dataset.as_ref(), &state.scope).await {
            Ok(block) => block,
            Err(e) => {
                warn!(session = session_id, error = %e, "grounding build failed; degrading");
                let reply_turn = ChatTurn::assistant(DATA_UNAVAILABLE_REPLY);
                state.push_turn(reply_turn.clone());
                appended.push(reply_turn);
                self.persist(session_id, loaded.as_ref(), state.clone(), &appended)
                    .await;
                return Ok(TurnOutcome {
                    reply: DATA_UNAVAILABLE_REPLY.to_string(),
                    intent: effective.label().to_string(),
                    scope: state.scope,
                    dissatisfaction_count: state.dissatisfaction_count,
                    escalated: state.escalated,
                    ticket_id: None,
                    degraded: true,
                });
            }
        };

        let request = CompletionRequest {
            system_instructions: SYSTEM_INSTRUCTIONS.to_string(),
            context_text: Some(block.text),
            context_label: Some(block.label),
            history: prior_history,
            message: message.to_string(),
        };

        let (reply, degraded) =
            match tokio::time::timeout(self.settings.llm_timeout, self.provider.complete(request))
                .await
            {
                Ok(Ok(reply)) => (reply, false),
                Ok(Err(e)) => {
                    warn!(session = session_id, error = %e, "provider failed; degrading reply");
                    (LLM_UNAVAILABLE_REPLY.to_string(), true)
                }
                Err(_) => {
                    warn!(session = session_id, "provider timed out; degrading reply");
                    (LLM_UNAVAILABLE_REPLY.to_string(), true)
                }
            };

        let reply_turn = ChatTurn::assistant(&reply);
        state.push_turn(reply_turn.clone());
        appended.push(reply_turn);
        self.persist(session_id, loaded.as_ref(), state.clone(), &appended)
            .await;

        Ok(TurnOutcome {
            reply,
            intent: effective.label().to_string(),
            scope: state.scope,
            dissatisfaction_count: state.dissatisfaction_count,
            escalated: state.escalated,
            ticket_id: None,
            degraded,
        })
    }

    /// Drop a session entirely.
    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        info!(session = session_id, "resetting session");
        self.store.reset(session_id).await
    }

    /// The dataset this orchestrator answers from.
    pub fn dataset(&self) -> &Arc<dyn DatasetProvider> {
        &self.dataset
    }

    /// File the ticket and answer with the escalation acknowledgement.
    ///
    /// The escalated flag is claimed through compare-and-set before the
    /// ticket is submitted, so two concurrent turns crossing the threshold
    /// file at most one ticket between them.
    async fn escalate(
        &self,
        session_id: &str,
        user: &UserIdentity,
        message: &str,
        loaded: Option<SessionState>,
        state: SessionState,
        count: u32,
    ) -> Result<TurnOutcome> {
        let mut claimed_state = state.clone();
        let mut claimed = self
            .store
            .compare_and_set(
                session_id,
                loaded.as_ref(),
                &state,
                self.settings.session_ttl,
            )
            .await
            .unwrap_or(false);

        if !claimed {
            // A concurrent turn changed the session. If it already
            // escalated, this turn must not file a second ticket.
            let current = self.store.get(session_id).await?.unwrap_or_default();
            if current.escalated {
                debug!(session = session_id, "escalation already claimed by a concurrent turn");
                let reply = "Our support team has already been notified about this \
                             conversation and will follow up with you shortly.";
                let snapshot = current.clone();
                let user_turn = ChatTurn::user(message);
                let reply_turn = ChatTurn::assistant(reply);
                let mut merged = current;
                merged.push_turn(user_turn.clone());
                merged.push_turn(reply_turn.clone());
                self.persist(
                    session_id,
                    Some(&snapshot),
                    merged.clone(),
                    &[user_turn, reply_turn],
                )
                .await;
                return Ok(TurnOutcome {
                    reply: reply.to_string(),
                    intent: merged.scope.intent().label().to_string(),
                    scope: merged.scope,
                    dissatisfaction_count: merged.dissatisfaction_count,
                    escalated: true,
                    ticket_id: None,
                    degraded: false,
                });
            }
            // The concurrent change was unrelated; claim once more on top
            // of it.
            let mut merged = current.clone();
            merged.scope = state.scope.clone();
            merged.dissatisfaction_count =
                merged.dissatisfaction_count.max(state.dissatisfaction_count);
            merged.escalated = true;
            merged.push_turn(ChatTurn::user(message));
            claimed = self
                .store
                .compare_and_set(
                    session_id,
                    Some(&current),
                    &merged,
                    self.settings.session_ttl,
                )
                .await
                .unwrap_or(false);
            claimed_state = merged;
        }

        if !claimed {
            // The claim was lost twice in a row. Not filing beats risking
            // two tickets for one session.
            warn!(session = session_id, "escalation claim lost twice; not filing a ticket");
            let reply = "I've noted your frustration. If this keeps happening, \
                         our support team will be brought in.";
            return Ok(TurnOutcome {
                reply: reply.to_string(),
                intent: state.scope.intent().label().to_string(),
                scope: state.scope,
                dissatisfaction_count: state.dissatisfaction_count,
                escalated: false,
                ticket_id: None,
                degraded: true,
            });
        }

        let payload = TicketPayload::new(session_id, user.clone(), &claimed_state, count);
        let ticket_id = match self.tickets.submit(&payload).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(session = session_id, error = %e, "ticket submission failed");
                None
            }
        };

        let reply = match &ticket_id {
            Some(id) => format!(
                "I understand this hasn't been helpful. I've escalated this \
                 conversation to our support team; ticket {} has been created \
                 and someone will follow up with you shortly.",
                id
            ),
            None => "I understand this hasn't been helpful. I've flagged this \
                     conversation for our support team and someone will follow \
                     up with you shortly."
                .to_string(),
        };

        let snapshot = claimed_state.clone();
        let reply_turn = ChatTurn::assistant(&reply);
        let mut final_state = claimed_state;
        final_state.push_turn(reply_turn.clone());
        self.persist(session_id, Some(&snapshot), final_state.clone(), &[reply_turn])
            .await;

        Ok(TurnOutcome {
            reply,
            intent: final_state.scope.intent().label().to_string(),
            scope: final_state.scope,
            dissatisfaction_count: final_state.dissatisfaction_count,
            escalated: true,
            ticket_id,
            degraded: false,
        })
    }

    async fn consult_arbiter(&self, message: &str, heuristic: Intent) -> Intent {
        let Some(arbiter) = &self.arbiter else {
            return heuristic;
        };
        match arbiter.confirm(message, heuristic).await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                debug!(error = %e, "intent arbiter unavailable; keeping heuristic");
                heuristic
            }
        }
    }

    /// Resolve student and class mentions against the live rosters.
    async fn resolve_entities(&self, message: &str) -> Result<EntityResolution> {
        let students = self.dataset.list_students().await?;
        let classes = self.dataset.list_classes().await?;

        let mut resolved = ResolvedEntities {
            students: resolver::find_mentions(message, &students),
            class_id: resolver::find_mentions(message, &classes).into_iter().next(),
        };

        // Capitalized tokens that did not match any roster name verbatim get
        // a fuzzy pass, so a misspelling asks instead of answering wrong.
        for token in candidate_tokens(message, &resolved.students) {
            match resolver::resolve(&token, &students, RosterKind::Student) {
                MatchResult::Exact(name) => {
                    if !resolved.students.contains(&name) {
                        resolved.students.push(name);
                    }
                }
                MatchResult::Suggestions(names) => {
                    return Ok(EntityResolution::NeedsClarification(format!(
                        "I couldn't find a student named \"{}\". Did you mean: {}?",
                        token,
                        names.join(", ")
                    )));
                }
                MatchResult::Ambiguous(names) => {
                    return Ok(EntityResolution::NeedsClarification(format!(
                        "A few students match \"{}\": {}. Which one did you mean?",
                        token,
                        names.join(", ")
                    )));
                }
                MatchResult::NotFound => {}
            }
        }

        Ok(EntityResolution::Resolved(resolved))
    }

    /// Write the session back. `appended` holds exactly the turns this
    /// request added to `state`; a contended write replays them onto the
    /// winner's state, which keeps them even when history is at its cap
    /// and the old turns were drained to make room.
    async fn persist(
        &self,
        session_id: &str,
        expected: Option<&SessionState>,
        state: SessionState,
        appended: &[ChatTurn],
    ) {
        let ttl = self.settings.session_ttl;
        match self
            .store
            .compare_and_set(session_id, expected, &state, ttl)
            .await
        {
            Ok(true) => return,
            Ok(false) => {
                // A concurrent turn won; merge our turn on top of theirs.
                let current = self
                    .store
                    .get(session_id)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                let mut merged = current.clone();
                merged.scope = state.scope.clone();
                merged.dissatisfaction_count =
                    merged.dissatisfaction_count.max(state.dissatisfaction_count);
                merged.escalated = merged.escalated || state.escalated;
                for turn in appended {
                    merged.push_turn(turn.clone());
                }
                let swapped = self
                    .store
                    .compare_and_set(session_id, Some(&current), &merged, ttl)
                    .await
                    .unwrap_or(false);
                if !swapped {
                    // Contention twice in a row; last writer wins.
                    if let Err(e) = self.store.put(session_id, &merged, ttl).await {
                        warn!(session = session_id, error = %e, "session persist failed");
                    }
                }
            }
            Err(e) => {
                warn!(session = session_id, error = %e, "session persist failed");
            }
        }
    }
}

/// Words that are capitalized mid-message but are not roster mentions.
/// Sentence-leading words and query vocabulary are skipped outright.
fn candidate_tokens(message: &str, known_mentions: &[String]) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "how", "what", "who", "whos", "where", "when", "why", "is", "are", "was",
        "the", "and", "about", "show", "tell", "compare", "vs", "versus", "did",
        "does", "doing", "me", "please", "can", "could", "week", "weeks", "last",
        "top", "bottom", "best", "worst", "rank", "ranking", "class", "student",
        "students", "for", "in", "of", "to", "a", "an", "with", "between",
        "difference", "trending", "their", "her", "his", "delta", "column",
        "mean", "i", "im", "this", "that", "still", "not", "it", "ok", "okay",
    ];
    let mentioned: Vec<String> = known_mentions
        .iter()
        .flat_map(|m| m.split_whitespace())
        .map(|w| w.to_lowercase())
        .collect();
    message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .filter(|t| t.chars().next().is_some_and(|c| c.is_uppercase()))
        .filter(|t| {
            let lower = t.to_lowercase();
            !STOPWORDS.contains(&lower.as_str()) && !mentioned.contains(&lower)
        })
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use classpulse_core::dataset::{ActivityRecord, InMemoryDataset};
    use classpulse_core::error::ClassPulseError;
    use classpulse_core::store::InMemorySessionStore;

    struct RecordingProvider {
        last_request: Mutex<Option<CompletionRequest>>,
        fail: bool,
    }

    impl RecordingProvider {
        fn new() -> Self {
            Self {
                last_request: Mutex::new(None),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                last_request: Mutex::new(None),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn default_model(&self) -> &str {
            "test"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            *self.last_request.lock().unwrap() = Some(request);
            if self.fail {
                Err(ClassPulseError::UpstreamUnavailable("down".into()))
            } else {
                Ok("canned answer".to_string())
            }
        }
    }

    struct CountingSink {
        submissions: Mutex<Vec<TicketPayload>>,
    }

    impl CountingSink {
        fn new() -> Self {
            Self {
                submissions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TicketSink for CountingSink {
        async fn submit(&self, payload: &TicketPayload) -> Result<String> {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push(payload.clone());
            Ok(format!("TICKET-{}", submissions.len()))
        }
    }

    fn record(student: &str, class_id: &str, concept: &str, score: f64, week: u32) -> ActivityRecord {
        ActivityRecord {
            student: student.to_string(),
            class_id: class_id.to_string(),
            concept: concept.to_string(),
            score,
            week_number: week,
            timestamp: Utc::now(),
        }
    }

    fn dataset() -> Arc<InMemoryDataset> {
        Arc::new(InMemoryDataset::new(vec![
            record("Aisha", "4B", "loops", 80.0, 1),
            record("Aisha", "4B", "debugging", 60.0, 2),
            record("Adam", "4B", "loops", 70.0, 1),
            record("Zoe", "5A", "loops", 90.0, 2),
        ]))
    }

    struct Harness {
        orchestrator: Orchestrator,
        provider: Arc<RecordingProvider>,
        sink: Arc<CountingSink>,
        store: Arc<InMemorySessionStore>,
    }

    fn harness(provider: RecordingProvider) -> Harness {
        let provider = Arc::new(provider);
        let sink = Arc::new(CountingSink::new());
        let store = Arc::new(InMemorySessionStore::new());
        let orchestrator = Orchestrator::new(
            dataset(),
            store.clone(),
            provider.clone(),
            sink.clone(),
            OrchestratorSettings::default(),
        );
        Harness {
            orchestrator,
            provider,
            sink,
            store,
        }
    }

    fn user() -> UserIdentity {
        UserIdentity {
            user_id: "u1".into(),
            name: "Ms. Rivera".into(),
            email: "rivera@example.edu".into(),
            role: "instructor".into(),
        }
    }

    #[tokio::test]
    async fn test_student_turn_sets_scope_and_grounds() {
        let h = harness(RecordingProvider::new());
        let outcome = h
            .orchestrator
            .handle_turn("s1", &user(), "How is Aisha doing?")
            .await
            .unwrap();

        assert_eq!(outcome.reply, "canned answer");
        assert_eq!(outcome.intent, "student_query");
        assert_eq!(outcome.scope, Scope::Student { name: "Aisha".into() });

        let request = h.provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.context_label.as_deref(), Some("STUDENT"));
        assert!(request.context_text.unwrap().contains("Student: Aisha"));
        // The current message is not duplicated into the history.
        assert!(request.history.is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_reuses_scope() {
        let h = harness(RecordingProvider::new());
        h.orchestrator
            .handle_turn("s1", &user(), "Compare Aisha and Adam")
            .await
            .unwrap();

        let outcome = h
            .orchestrator
            .handle_turn("s1", &user(), "What does the Delta column mean?")
            .await
            .unwrap();

        assert_eq!(outcome.intent, "compare_query");
        assert_eq!(
            outcome.scope,
            Scope::Compare {
                first: "Aisha".into(),
                second: "Adam".into(),
            }
        );
        let request = h.provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.context_label.as_deref(), Some("COMPARISON"));
        // Both prior turns are in the prompt history.
        assert_eq!(request.history.len(), 2);
    }

    #[tokio::test]
    async fn test_new_entities_replace_scope() {
        let h = harness(RecordingProvider::new());
        h.orchestrator
            .handle_turn("s1", &user(), "How is Aisha doing?")
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .handle_turn("s1", &user(), "How is 4B trending?")
            .await
            .unwrap();
        assert_eq!(outcome.intent, "class_query");
        assert_eq!(outcome.scope, Scope::Class { id: "4B".into() });
    }

    #[tokio::test]
    async fn test_ranking_query_from_keywords_alone() {
        let h = harness(RecordingProvider::new());
        let outcome = h
            .orchestrator
            .handle_turn("s1", &user(), "Show me the bottom 2 students")
            .await
            .unwrap();
        assert_eq!(outcome.intent, "ranking_query");
        match outcome.scope {
            Scope::Ranking { filters } => {
                assert!(filters.ascending);
                assert_eq!(filters.limit, 2);
            }
            other => panic!("expected ranking scope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_misspelling_asks_for_clarification() {
        let h = harness(RecordingProvider::new());
        let outcome = h
            .orchestrator
            .handle_turn("s1", &user(), "How is Aishaa doing?")
            .await
            .unwrap();

        assert!(outcome.reply.contains("Did you mean"));
        assert!(outcome.reply.contains("Aisha"));
        // The provider is never called for a clarification turn.
        assert!(h.provider.last_request.lock().unwrap().is_none());
        // The exchange is still recorded.
        let state = h.store.get("s1").await.unwrap().unwrap();
        assert_eq!(state.history.len(), 2);
    }

    #[tokio::test]
    async fn test_escalation_fires_once_with_ticket() {
        let h = harness(RecordingProvider::new());
        let u = user();

        let o1 = h
            .orchestrator
            .handle_turn("s1", &u, "This doesn't help")
            .await
            .unwrap();
        assert_eq!(o1.dissatisfaction_count, 1);
        assert!(o1.ticket_id.is_none());

        let o2 = h
            .orchestrator
            .handle_turn("s1", &u, "Still not clear")
            .await
            .unwrap();
        assert_eq!(o2.dissatisfaction_count, 2);
        assert!(!o2.escalated);

        let o3 = h
            .orchestrator
            .handle_turn("s1", &u, "I need to talk to support")
            .await
            .unwrap();
        assert!(o3.escalated);
        assert!(o3.ticket_id.is_some());
        assert!(o3.reply.contains("support team"));
        assert_eq!(h.sink.submissions.lock().unwrap().len(), 1);

        // A fourth signal counts but never files a second ticket.
        let o4 = h
            .orchestrator
            .handle_turn("s1", &u, "still wrong")
            .await
            .unwrap();
        assert!(o4.escalated);
        assert!(o4.ticket_id.is_none());
        assert_eq!(o4.dissatisfaction_count, 4);
        assert_eq!(h.sink.submissions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ticket_includes_conversation_history() {
        let h = harness(RecordingProvider::new());
        let u = user();
        h.orchestrator.handle_turn("s1", &u, "How is Aisha doing?").await.unwrap();
        h.orchestrator.handle_turn("s1", &u, "This doesn't help").await.unwrap();
        h.orchestrator.handle_turn("s1", &u, "Still not clear").await.unwrap();
        h.orchestrator.handle_turn("s1", &u, "not helpful at all").await.unwrap();

        let submissions = h.sink.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        let ticket = &submissions[0];
        assert_eq!(ticket.user.email, "rivera@example.edu");
        assert!(ticket
            .history
            .iter()
            .any(|t| t.content == "How is Aisha doing?"));
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_but_keeps_session() {
        let h = harness(RecordingProvider::failing());
        let outcome = h
            .orchestrator
            .handle_turn("s1", &user(), "How is Aisha doing?")
            .await
            .unwrap();

        assert!(outcome.degraded);
        assert!(outcome.reply.contains("try again"));
        // Scope and history survive the failure.
        let state = h.store.get("s1").await.unwrap().unwrap();
        assert_eq!(state.scope, Scope::Student { name: "Aisha".into() });
        assert_eq!(state.history.len(), 2);
    }

    #[tokio::test]
    async fn test_general_query_gets_knowledge_base() {
        let h = harness(RecordingProvider::new());
        let outcome = h
            .orchestrator
            .handle_turn("s1", &user(), "What can you do?")
            .await
            .unwrap();
        assert_eq!(outcome.intent, "general_query");
        let request = h.provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.context_label.as_deref(), Some("GENERAL"));
    }

    #[tokio::test]
    async fn test_reset_clears_session() {
        let h = harness(RecordingProvider::new());
        let u = user();
        h.orchestrator.handle_turn("s1", &u, "How is Aisha doing?").await.unwrap();
        h.orchestrator.reset_session("s1").await.unwrap();
        assert!(h.store.get("s1").await.unwrap().is_none());

        let outcome = h
            .orchestrator
            .handle_turn("s1", &u, "What about her debugging?")
            .await
            .unwrap();
        // No prior scope after the reset; the turn defaults to general.
        assert_eq!(outcome.intent, "general_query");
    }

    #[tokio::test]
    async fn test_firing_turn_keeps_prior_scope() {
        let h = harness(RecordingProvider::new());
        let u = user();
        h.orchestrator.handle_turn("s1", &u, "This doesn't help").await.unwrap();
        h.orchestrator.handle_turn("s1", &u, "Still not clear").await.unwrap();

        let outcome = h
            .orchestrator
            .handle_turn("s1", &u, "Compare Aisha and Adam, this is not helpful")
            .await
            .unwrap();

        // The firing turn answers with the escalation acknowledgement and
        // leaves the scope alone, even when the message names entities.
        assert!(outcome.escalated);
        assert!(outcome.ticket_id.is_some());
        assert_eq!(outcome.scope, Scope::General);
        let state = h.store.get("s1").await.unwrap().unwrap();
        assert_eq!(state.scope, Scope::General);
    }

    /// Store whose first compare-and-set loses, as if a concurrent turn
    /// committed in between. Everything else delegates.
    struct ContendedOnceStore {
        inner: InMemorySessionStore,
        contended: AtomicBool,
    }

    impl ContendedOnceStore {
        fn new() -> Self {
            Self {
                inner: InMemorySessionStore::new(),
                contended: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SessionStore for ContendedOnceStore {
        async fn get(&self, session_id: &str) -> Result<Option<SessionState>> {
            self.inner.get(session_id).await
        }

        async fn put(&self, session_id: &str, state: &SessionState, ttl: Duration) -> Result<()> {
            self.inner.put(session_id, state, ttl).await
        }

        async fn compare_and_set(
            &self,
            session_id: &str,
            expected: Option<&SessionState>,
            new: &SessionState,
            ttl: Duration,
        ) -> Result<bool> {
            if !self.contended.swap(true, Ordering::SeqCst) {
                return Ok(false);
            }
            self.inner.compare_and_set(session_id, expected, new, ttl).await
        }

        async fn reset(&self, session_id: &str) -> Result<()> {
            self.inner.reset(session_id).await
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_contended_write_keeps_turn_when_history_full() {
        let store = Arc::new(ContendedOnceStore::new());
        let mut seeded = SessionState::new();
        for i in 0..HISTORY_LIMIT {
            seeded.push_turn(ChatTurn::user(&format!("old {}", i)));
        }
        store.put("s1", &seeded, TTL).await.unwrap();

        let orchestrator = Orchestrator::new(
            dataset(),
            store.clone(),
            Arc::new(RecordingProvider::new()),
            Arc::new(CountingSink::new()),
            OrchestratorSettings::default(),
        );
        let outcome = orchestrator
            .handle_turn("s1", &user(), "How is Aisha doing?")
            .await
            .unwrap();
        assert_eq!(outcome.reply, "canned answer");

        // The merge after the lost compare-and-set must not drop this
        // turn's messages just because the cap drained old entries.
        let committed = store.get("s1").await.unwrap().unwrap();
        assert_eq!(committed.history.len(), HISTORY_LIMIT);
        assert!(committed
            .history
            .iter()
            .any(|t| t.content == "How is Aisha doing?"));
        assert!(committed.history.iter().any(|t| t.content == "canned answer"));
        assert!(!committed.history.iter().any(|t| t.content == "old 0"));
    }

    /// Store where the first compare-and-set loses to a turn that already
    /// escalated the session.
    struct EscalatedBehindStore {
        inner: InMemorySessionStore,
        contended: AtomicBool,
    }

    impl EscalatedBehindStore {
        fn new() -> Self {
            Self {
                inner: InMemorySessionStore::new(),
                contended: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SessionStore for EscalatedBehindStore {
        async fn get(&self, session_id: &str) -> Result<Option<SessionState>> {
            self.inner.get(session_id).await
        }

        async fn put(&self, session_id: &str, state: &SessionState, ttl: Duration) -> Result<()> {
            self.inner.put(session_id, state, ttl).await
        }

        async fn compare_and_set(
            &self,
            session_id: &str,
            expected: Option<&SessionState>,
            new: &SessionState,
            ttl: Duration,
        ) -> Result<bool> {
            if !self.contended.swap(true, Ordering::SeqCst) {
                let mut winner = self.inner.get(session_id).await?.unwrap_or_default();
                winner.dissatisfaction_count += 1;
                winner.escalated = true;
                self.inner.put(session_id, &winner, ttl).await?;
                return Ok(false);
            }
            self.inner.compare_and_set(session_id, expected, new, ttl).await
        }

        async fn reset(&self, session_id: &str) -> Result<()> {
            self.inner.reset(session_id).await
        }
    }

    #[tokio::test]
    async fn test_lost_escalation_claim_files_no_second_ticket() {
        let store = Arc::new(EscalatedBehindStore::new());
        let mut seeded = SessionState::new();
        seeded.dissatisfaction_count = 2;
        store.put("s1", &seeded, TTL).await.unwrap();

        let sink = Arc::new(CountingSink::new());
        let orchestrator = Orchestrator::new(
            dataset(),
            store.clone(),
            Arc::new(RecordingProvider::new()),
            sink.clone(),
            OrchestratorSettings::default(),
        );
        let outcome = orchestrator
            .handle_turn("s1", &user(), "I need to talk to support")
            .await
            .unwrap();

        // The concurrent turn won the escalated flag; this one acknowledges
        // without filing anything.
        assert!(outcome.escalated);
        assert!(outcome.ticket_id.is_none());
        assert!(outcome.reply.contains("already been notified"));
        assert!(sink.submissions.lock().unwrap().is_empty());
        let committed = store.get("s1").await.unwrap().unwrap();
        assert!(committed.escalated);
        assert!(committed
            .history
            .iter()
            .any(|t| t.content == "I need to talk to support"));
    }

    /// Store where every compare-and-set loses.
    struct AlwaysLosingStore {
        inner: InMemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for AlwaysLosingStore {
        async fn get(&self, session_id: &str) -> Result<Option<SessionState>> {
            self.inner.get(session_id).await
        }

        async fn put(&self, session_id: &str, state: &SessionState, ttl: Duration) -> Result<()> {
            self.inner.put(session_id, state, ttl).await
        }

        async fn compare_and_set(
            &self,
            _session_id: &str,
            _expected: Option<&SessionState>,
            _new: &SessionState,
            _ttl: Duration,
        ) -> Result<bool> {
            Ok(false)
        }

        async fn reset(&self, session_id: &str) -> Result<()> {
            self.inner.reset(session_id).await
        }
    }

    #[tokio::test]
    async fn test_escalation_claim_lost_twice_does_not_ticket() {
        let store = Arc::new(AlwaysLosingStore {
            inner: InMemorySessionStore::new(),
        });
        let mut seeded = SessionState::new();
        seeded.dissatisfaction_count = 2;
        store.put("s1", &seeded, TTL).await.unwrap();

        let sink = Arc::new(CountingSink::new());
        let orchestrator = Orchestrator::new(
            dataset(),
            store.clone(),
            Arc::new(RecordingProvider::new()),
            sink.clone(),
            OrchestratorSettings::default(),
        );
        let outcome = orchestrator
            .handle_turn("s1", &user(), "I need to talk to support")
            .await
            .unwrap();

        // Unable to claim the flag, the turn degrades instead of risking a
        // duplicate ticket.
        assert!(!outcome.escalated);
        assert!(outcome.degraded);
        assert!(outcome.ticket_id.is_none());
        assert!(sink.submissions.lock().unwrap().is_empty());
    }
}
