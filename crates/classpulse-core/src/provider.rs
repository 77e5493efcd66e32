//! LLM provider trait — the abstraction over hosted text-completion APIs.
//!
//! Providers are treated as slow, failing, and non-deterministic in content;
//! they are never trusted for side effects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::ChatTurn;

/// A single completion request: system instructions, a grounding block, the
/// bounded conversation history, and the current message.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system_instructions: String,
    /// Compact analytics + record tail grounding the answer, if any.
    pub context_text: Option<String>,
    /// Label for the data context ("student", "compare", ...).
    pub context_label: Option<String>,
    pub history: Vec<ChatTurn>,
    pub message: String,
}

/// LLM provider trait — implement this to plug in a completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Default model for this provider.
    fn default_model(&self) -> &str;

    /// Send a completion request and return the reply text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on one completion round-trip, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_base: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
