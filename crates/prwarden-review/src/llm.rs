use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use prwarden_core::{LlmConfig, ReviewError};
use serde::{Deserialize, Serialize};

use crate::prompt::FilePrompt;
use crate::session::SessionHandle;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use prwarden_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Review this code".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use prwarden_review::llm::Role;
///
/// let role = Role::System;
/// assert_eq!(serde_json::to_string(&role).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
}

/// Everything the completion service needs for one file.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Reviewer instructions sent as the system message.
    pub system_prompt: String,
    /// File-specific prompt sent as the user message.
    pub user_prompt: String,
    /// Model identifier, e.g. `"gpt-4"`.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
}

impl CompletionRequest {
    /// Pair a built prompt with the model settings from review config.
    pub fn new(prompt: FilePrompt, model: &str, temperature: f64) -> Self {
        Self {
            system_prompt: prompt.system,
            user_prompt: prompt.user,
            model: model.to_string(),
            temperature,
        }
    }

    fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: Role::System,
                content: self.system_prompt.clone(),
            },
            ChatMessage {
                role: Role::User,
                content: self.user_prompt.clone(),
            },
        ]
    }
}

/// A chat completion backend.
///
/// Implementations never retry; the caller decides what a failure means.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Submit a request and return the generated text.
    ///
    /// # Errors
    ///
    /// [`ReviewError::RateLimit`] when throttled, [`ReviewError::Auth`] when
    /// the key is rejected, [`ReviewError::Transient`] otherwise.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ReviewError>;
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes the `/v1/chat/completions` endpoint:
/// OpenAI, Ollama, vLLM, LiteLLM, etc.
///
/// # Examples
///
/// ```
/// use prwarden_core::LlmConfig;
/// use prwarden_review::llm::LlmClient;
///
/// let client = LlmClient::new("test-key", &LlmConfig::default()).unwrap();
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    closed: AtomicBool,
}

impl LlmClient {
    /// Create a new LLM client from an API key and endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Configuration`] if the HTTP client cannot be built.
    pub fn new(api_key: &str, config: &LlmConfig) -> Result<Self, ReviewError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ReviewError::Configuration(format!("failed to create HTTP client: {e}")))?;
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url,
            closed: AtomicBool::new(false),
        })
    }

    /// Return the endpoint base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ReviewError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReviewError::SessionClosed("completion"));
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages(),
            "temperature": request.temperature,
        });

        tracing::debug!(model = %request.model, prompt_len = request.user_prompt.len(), "sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ReviewError::Transient(format!("completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ReviewError::from_status(
                status.as_u16(),
                format!("LLM API error {status}: {body_text}"),
            ));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ReviewError::Transient(format!("failed to parse response: {e}")))?;

        let content = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                ReviewError::Transient(format!("unexpected response structure: {response_body}"))
            })?;

        Ok(content.to_string())
    }
}

impl SessionHandle for LlmClient {
    fn name(&self) -> &'static str {
        "completion"
    }

    /// Refuse further requests; the reqwest pool is freed on drop.
    fn close(&self) -> Result<(), ReviewError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ReviewError::SessionClosed("completion"));
        }
        Ok(())
    }
}
