//! Multi-provider LLM routing with normalized tool-call semantics.
//!
//! Providers sit behind the canonical [`traits::LlmResponse`] /
//! [`ma_domain::tool::ToolCall`] shapes; the sanitized↔original
//! tool-name mapping is per-request state, never global.

pub mod anthropic;
pub mod openai;
pub mod pricing;
pub mod router;
pub mod sanitize;
pub mod traits;

pub use router::LlmRouter;
pub use traits::{ChatRequest, LlmProvider, LlmResponse};
