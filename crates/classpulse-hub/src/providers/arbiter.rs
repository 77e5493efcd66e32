//! Model-backed second opinion for intent classification.
//!
//! Consulted only when the keyword heuristic lands on the general default
//! and the session has no prior scope to fall back on. The model may only
//! promote the intent to a ranking query; anything else it says is ignored,
//! since entity-backed intents require entities the resolver did not find.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use classpulse_core::error::Result;
use classpulse_core::intent::{Intent, IntentArbiter};
use classpulse_core::provider::{CompletionRequest, LlmProvider};

const ARBITER_INSTRUCTIONS: &str = "\
You classify one instructor message for a student-analytics assistant. \
Reply with exactly one label and nothing else: ranking_query if the message \
asks to order, rank, or find extremes among students; otherwise general_query.";

pub struct LlmIntentArbiter {
    provider: Arc<dyn LlmProvider>,
}

impl LlmIntentArbiter {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl IntentArbiter for LlmIntentArbiter {
    async fn confirm(&self, message: &str, heuristic: Intent) -> Result<Intent> {
        let request = CompletionRequest {
            system_instructions: ARBITER_INSTRUCTIONS.to_string(),
            message: message.to_string(),
            ..Default::default()
        };
        let reply = self.provider.complete(request).await?;
        let confirmed = match Intent::from_label(&reply) {
            Some(Intent::RankingQuery) => Intent::RankingQuery,
            _ => heuristic,
        };
        debug!(%reply, %heuristic, %confirmed, "intent arbiter consulted");
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classpulse_core::error::ClassPulseError;

    struct CannedProvider(String);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn default_model(&self) -> &str {
            "test"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            if self.0 == "fail" {
                Err(ClassPulseError::UpstreamUnavailable("down".into()))
            } else {
                Ok(self.0.clone())
            }
        }
    }

    #[tokio::test]
    async fn test_promotes_only_to_ranking() {
        let arbiter = LlmIntentArbiter::new(Arc::new(CannedProvider("ranking_query".into())));
        assert_eq!(
            arbiter.confirm("who leads?", Intent::GeneralQuery).await.unwrap(),
            Intent::RankingQuery
        );

        // Entity-backed labels from the model are ignored.
        let arbiter = LlmIntentArbiter::new(Arc::new(CannedProvider("student_query".into())));
        assert_eq!(
            arbiter.confirm("hello", Intent::GeneralQuery).await.unwrap(),
            Intent::GeneralQuery
        );
    }

    #[tokio::test]
    async fn test_gibberish_keeps_heuristic() {
        let arbiter = LlmIntentArbiter::new(Arc::new(CannedProvider("Sure! The intent is...".into())));
        assert_eq!(
            arbiter.confirm("hello", Intent::GeneralQuery).await.unwrap(),
            Intent::GeneralQuery
        );
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let arbiter = LlmIntentArbiter::new(Arc::new(CannedProvider("fail".into())));
        assert!(arbiter.confirm("hello", Intent::GeneralQuery).await.is_err());
    }
}
