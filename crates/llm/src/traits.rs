use ma_domain::chat::{ChatMessage, StopReason};
use ma_domain::error::{Error, Result};
use ma_domain::tool::{ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model identifier (canonical, e.g. "claude-sonnet-4-20250514").
    pub model: String,
    /// Maximum tokens in the response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Textual content, if the model produced any.
    pub content: Option<String>,
    /// Canonical tool calls (original tool names restored).
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// The model that actually produced the response.
    pub model: String,
    pub stop_reason: StopReason,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter implements. Adapters translate between
/// the canonical types and each provider's wire format, including the
/// per-request tool-name sanitization round trip.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse>;

    /// Generate a text embedding.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    /// Whether [`Self::embed`] is actually implemented.
    fn supports_embeddings(&self) -> bool {
        false
    }

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Convert a [`reqwest::Error`] into the domain [`Error`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
