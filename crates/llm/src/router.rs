//! The LLM router: provider selection by model family, transient-error
//! retry with exponential backoff, and cost estimation.

use std::sync::Arc;

use ma_domain::config::Config;
use ma_domain::error::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiProvider;
use crate::pricing;
use crate::traits::{ChatRequest, LlmProvider, LlmResponse};

/// Attempts per chat call before surfacing the provider error.
const MAX_ATTEMPTS: u32 = 3;

/// Backoff before retry `attempt` (0-based): `2^attempt` seconds.
pub(crate) fn backoff_seconds(attempt: u32) -> u64 {
    1u64 << attempt
}

/// Which adapter family serves a model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProviderKind {
    Anthropic,
    OpenAi,
}

pub(crate) fn kind_for_model(model: &str) -> Option<ProviderKind> {
    if model.starts_with("claude") {
        Some(ProviderKind::Anthropic)
    } else if model.starts_with("gpt") || model.starts_with("text-embedding") || model.starts_with("o") {
        Some(ProviderKind::OpenAi)
    } else {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmRouter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Routes chat and embedding calls to the configured providers.
pub struct LlmRouter {
    anthropic: Option<Arc<dyn LlmProvider>>,
    openai: Option<Arc<dyn LlmProvider>>,
    embedding_model: String,
}

impl LlmRouter {
    /// Build from config. Absent API keys just leave that provider out;
    /// the router picks from whatever is available.
    pub fn from_config(config: &Config) -> Result<Self> {
        let anthropic = match &config.anthropic_api_key {
            Some(key) => {
                tracing::info!("anthropic provider registered");
                Some(Arc::new(AnthropicProvider::new(key.clone())?) as Arc<dyn LlmProvider>)
            }
            None => None,
        };
        let openai = match &config.openai_api_key {
            Some(key) => {
                tracing::info!("openai provider registered");
                Some(Arc::new(OpenAiProvider::new(key.clone())?) as Arc<dyn LlmProvider>)
            }
            None => None,
        };
        if anthropic.is_none() && openai.is_none() {
            tracing::warn!(
                "no LLM providers configured — chat and embedding calls will fail \
                 until a provider API key is set"
            );
        }
        Ok(Self {
            anthropic,
            openai,
            embedding_model: config.embedding_model.clone(),
        })
    }

    fn provider_for_model(&self, model: &str) -> Result<Arc<dyn LlmProvider>> {
        let preferred = match kind_for_model(model) {
            Some(ProviderKind::Anthropic) => self.anthropic.clone(),
            Some(ProviderKind::OpenAi) => self.openai.clone(),
            None => None,
        };
        preferred
            .or_else(|| self.anthropic.clone())
            .or_else(|| self.openai.clone())
            .ok_or_else(|| Error::LlmCall(format!("no provider available for model {model}")))
    }

    /// Chat with retry: up to 3 attempts with `2^attempt` seconds of
    /// backoff, then the last provider error surfaces.
    pub async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        let provider = self.provider_for_model(&req.model)?;

        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            match provider.chat(req).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    tracing::warn!(
                        provider = provider.provider_id(),
                        attempt,
                        error = %e,
                        "llm call failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_seconds(
                            attempt,
                        )))
                        .await;
                    }
                }
            }
        }
        Err(last_error.expect("at least one attempt was made"))
    }

    /// Embed text via the embedding-capable provider. Callers treat a
    /// failure as "no embedding" — it is never fatal to their flow.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let provider = [self.openai.clone(), self.anthropic.clone()]
            .into_iter()
            .flatten()
            .find(|p| p.supports_embeddings())
            .ok_or_else(|| Error::LlmCall("no embedding-capable provider configured".into()))?;
        provider.embed(text, &self.embedding_model).await
    }

    /// Estimated USD cost for a finished call.
    pub fn estimate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        pricing::estimate_cost(model, input_tokens, output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_families() {
        assert_eq!(kind_for_model("claude-sonnet-4-20250514"), Some(ProviderKind::Anthropic));
        assert_eq!(kind_for_model("gpt-4o-mini"), Some(ProviderKind::OpenAi));
        assert_eq!(kind_for_model("text-embedding-3-small"), Some(ProviderKind::OpenAi));
        assert_eq!(kind_for_model("mistral-large"), None);
    }

    #[test]
    fn backoff_is_exponential() {
        assert_eq!(backoff_seconds(0), 1);
        assert_eq!(backoff_seconds(1), 2);
        assert_eq!(backoff_seconds(2), 4);
    }
}
