//! Provider trait, the abstraction over text-generation backends.
//!
//! A Provider knows how to send a prompt to one upstream service and get a
//! single completion back. It does not retry, fall back, or classify its own
//! failures; the dispatcher does all of that on top of [`ProviderError`].
//!
//! Implementations: OpenAI-compatible (message array) and Anthropic
//! (structured content blocks).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::Message;

/// A completion request for one (provider, model) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "deepseek-chat", "gpt-4-turbo")
    pub model: String,

    /// The full prompt, system preamble first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated reply text (never empty; empty completions are errors)
    pub content: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// The dispatcher calls `complete()` without knowing which wire format sits
/// behind it. Implementations must report upstream trouble as
/// [`ProviderError`] rather than panicking, and must not embed credentials in
/// error messages.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "deepseek", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_request_defaults() {
        let req: ProviderRequest = serde_json::from_value(serde_json::json!({
            "model": "deepseek-chat",
            "messages": [],
        }))
        .unwrap();
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn provider_request_skips_empty_max_tokens() {
        let req = ProviderRequest {
            model: "gpt-4-turbo".into(),
            messages: vec![Message::user("hi")],
            temperature: default_temperature(),
            max_tokens: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("max_tokens"));
    }
}
