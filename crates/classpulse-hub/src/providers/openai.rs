//! OpenAI-compatible provider — works with OpenAI, Ollama, LM Studio, etc.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use classpulse_core::error::{ClassPulseError, Result};
use classpulse_core::provider::{CompletionRequest, LlmProvider, ProviderConfig};

/// OpenAI-compatible provider.
///
/// Works with any API that follows the OpenAI chat completions format:
/// - OpenAI (api.openai.com)
/// - Ollama (localhost:11434)
/// - OpenRouter (openrouter.ai)
/// - Groq, Together, Fireworks, etc.
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
    api_url: String,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let api_url = format!("{}/chat/completions", api_base.trim_end_matches('/'));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            config,
            api_url,
        }
    }

    /// Create a provider for Ollama (local).
    pub fn ollama(model: &str) -> Self {
        Self::new(ProviderConfig {
            provider: "ollama".to_string(),
            model: model.to_string(),
            api_key: Some("ollama".to_string()),
            api_base: Some("http://localhost:11434/v1".to_string()),
            ..Default::default()
        })
    }

    /// Create a provider for OpenAI.
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self::new(ProviderConfig {
            provider: "openai".to_string(),
            model: model.to_string(),
            api_key: Some(api_key.to_string()),
            api_base: None,
            ..Default::default()
        })
    }

    /// Build the chat messages for a completion request. The grounding block
    /// rides on the user message under a `[DATA CONTEXT: ...]` tag so the
    /// model can tell instructions, conversation, and data apart.
    fn build_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(serde_json::json!({
            "role": "system",
            "content": request.system_instructions,
        }));
        for turn in &request.history {
            messages.push(serde_json::json!({
                "role": turn.role.as_str(),
                "content": turn.content,
            }));
        }
        let content = match (&request.context_text, &request.context_label) {
            (Some(context), Some(label)) => format!(
                "{}\n\n[DATA CONTEXT: {}]\n{}",
                request.message, label, context
            ),
            (Some(context), None) => {
                format!("{}\n\n[DATA CONTEXT]\n{}", request.message, context)
            }
            _ => request.message.clone(),
        };
        messages.push(serde_json::json!({
            "role": "user",
            "content": content,
        }));
        messages
    }
}

/// Internal request body.
#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    temperature: f32,
}

/// Internal response body.
#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        info!(
            provider = %self.config.provider,
            model = %self.config.model,
            "calling completion API"
        );

        let body = ApiRequest {
            model: self.config.model.clone(),
            messages: Self::build_messages(&request),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let api_key = self.config.api_key.as_deref().unwrap_or("");

        let resp = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let body_text = resp.text().await?;

        debug!(%status, body_len = body_text.len(), "completion API response");

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiError>(&body_text) {
                return Err(ClassPulseError::UpstreamUnavailable(format!(
                    "{} API error ({}): {}",
                    self.config.provider, status, err.error.message
                )));
            }
            return Err(ClassPulseError::UpstreamUnavailable(format!(
                "{} API error ({}): {}",
                self.config.provider,
                status,
                &body_text[..body_text.len().min(200)]
            )));
        }

        let api_resp: ApiResponse = serde_json::from_str(&body_text).map_err(|e| {
            ClassPulseError::UpstreamUnavailable(format!(
                "failed to parse response: {} - body: {}",
                e,
                &body_text[..body_text.len().min(200)]
            ))
        })?;

        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClassPulseError::UpstreamUnavailable("no choices in response".into()))?;

        choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ClassPulseError::UpstreamUnavailable("empty completion".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classpulse_core::message::ChatTurn;

    #[test]
    fn test_messages_carry_tagged_context() {
        let request = CompletionRequest {
            system_instructions: "You are ClassPulse.".into(),
            context_text: Some("Student: Aisha".into()),
            context_label: Some("STUDENT".into()),
            history: vec![
                ChatTurn::user("How is Aisha doing?"),
                ChatTurn::assistant("She averages 76."),
            ],
            message: "And her weakest concept?".into(),
        };
        let messages = OpenAiProvider::build_messages(&request);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        let last = messages[3]["content"].as_str().unwrap();
        assert!(last.starts_with("And her weakest concept?"));
        assert!(last.contains("[DATA CONTEXT: STUDENT]"));
        assert!(last.contains("Student: Aisha"));
    }

    #[test]
    fn test_messages_without_context_are_plain() {
        let request = CompletionRequest {
            system_instructions: "You are ClassPulse.".into(),
            message: "Hello".into(),
            ..Default::default()
        };
        let messages = OpenAiProvider::build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"], "Hello");
    }
}
