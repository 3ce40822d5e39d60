//! [`LlmDriver`] – OpenAI-compatible reasoning client.
//!
//! Talks to any server exposing `POST /v1/chat/completions`: a local
//! [Ollama](https://ollama.com) (`http://localhost:11434`), OpenAI, or
//! OpenRouter.  The [`IntentReply`] JSON Schema is injected via
//! `response_format` so the model is pushed towards the exact reply shape the
//! intent normalizer accepts.
//!
//! # Example
//!
//! ```rust,no_run
//! use scrub_runtime::llm_driver::{LlmDriver, LlmProvider};
//! use scrub_runtime::prompts::PromptProfile;
//!
//! let driver = LlmDriver::new(LlmProvider::Ollama.default_base_url(), "llama3")
//!     .with_profile(PromptProfile::Conservative);
//!
//! // Requires a running model server – skipped in unit tests.
//! // let raw = driver.interpret("kiran, stitch please", &operators).await?;
//! ```

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use schemars::schema_for;
use scrub_kernel::OperatorProfiles;
use scrub_types::{IntentReply, ScrubError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::intent::ReasoningService;
use crate::prompts::PromptProfile;

/// Default bound for one reasoning request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from LLM driver operations.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl LlmError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LlmError::Http(e) if e.is_timeout())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Supported chat-completions backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    OpenAi,
    OpenRouter,
}

impl LlmProvider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(LlmProvider::Ollama),
            "openai" => Some(LlmProvider::OpenAi),
            "openrouter" => Some(LlmProvider::OpenRouter),
            _ => None,
        }
    }

    /// Base URL the `/v1/chat/completions` path is appended to.
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::OpenAi => "https://api.openai.com",
            LlmProvider::OpenRouter => "https://openrouter.ai/api",
        }
    }

    /// Hosted providers reject unauthenticated requests.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, LlmProvider::Ollama)
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::OpenRouter => write!(f, "openrouter"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonSchemaSpec {
    name: &'static str,
    schema: serde_json::Value,
}

/// `response_format` field that enforces structured JSON Schema output.
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaSpec,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share across instruction cycles.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    profile: RwLock<PromptProfile>,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Create a new driver pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// and using `model` (e.g. `"llama3"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            profile: RwLock::new(PromptProfile::default()),
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.  Blank keys
    /// are ignored.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_profile(self, profile: PromptProfile) -> Self {
        self.set_profile(profile);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Per-request bound applied to every reasoning call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn profile(&self) -> PromptProfile {
        *self.profile.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Switch the prompt profile used by subsequent requests.
    pub fn set_profile(&self, profile: PromptProfile) {
        *self.profile.write().unwrap_or_else(|p| p.into_inner()) = profile;
    }

    /// Send `messages` to the model and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the request fails, times out, or the
    /// server answers with a non-2xx status, or [`LlmError::BadResponse`] if
    /// the response shape is unexpected.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        profile: PromptProfile,
    ) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let schema =
            serde_json::to_value(schema_for!(IntentReply)).unwrap_or(serde_json::Value::Null);
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            temperature: profile.temperature(),
            max_tokens: profile.max_tokens(),
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaSpec {
                    name: "intent_reply",
                    schema,
                },
            },
        };

        let mut request = self.client.post(&url).timeout(self.timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }
}

#[async_trait]
impl ReasoningService for LlmDriver {
    async fn interpret(
        &self,
        instruction: &str,
        operators: &OperatorProfiles,
    ) -> Result<String, ScrubError> {
        let profile = self.profile();
        let messages = [
            ChatMessage {
                role: Role::System,
                content: profile.system_prompt(operators),
            },
            ChatMessage {
                role: Role::User,
                content: format!("Instruction: {instruction}"),
            },
        ];
        debug!(model = %self.model, %profile, "querying reasoning service");

        self.complete(&messages, profile).await.map_err(|e| {
            if e.is_timeout() {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "reasoning service timed out");
                ScrubError::ReasoningTimeout(self.timeout.as_millis() as u64)
            } else {
                error!(error = %e, "reasoning service call failed");
                ScrubError::ReasoningServiceFailure(e.to_string())
            }
        })
    }
}
