//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Differences from the message-array format:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field
//! - Strictly alternating user/assistant turns, starting with user
//! - Replies arrive as a list of typed content blocks

use async_trait::async_trait;
use replyd_core::error::ProviderError;
use replyd_core::message::{Message, Role};
use replyd_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 1500;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Register under a different name (several Anthropic accounts, proxies).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic content-block format.
    ///
    /// Trimmed history can start with an assistant turn or hold two turns of
    /// the same role in a row; the Messages API rejects both, so leading
    /// assistant turns are dropped and same-role neighbours are merged.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages
            .iter()
            .skip_while(|m| m.role == Role::Assistant)
        {
            let role = msg.role.as_str();
            let block = ContentBlock::Text {
                text: msg.content.clone(),
            };

            match result.last_mut() {
                Some(last) if last.role == role => last.content.push(block),
                _ => result.push(AnthropicMessage {
                    role: role.to_string(),
                    content: vec![block],
                }),
            }
        }

        result
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature.min(1.0),
        });

        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        body
    }

    fn response_to_provider_response(
        resp: AnthropicResponse,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let text_content = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if text_content.is_empty() {
            return Err(ProviderError::InvalidResponse(format!(
                "Empty completion (stop_reason: {})",
                resp.stop_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let usage = resp.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ProviderResponse {
            content: text_content,
            model: resp.model,
            usage,
        })
    }
}

#[async_trait]
impl replyd_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| http::send_error(&self.name, e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.name, response).await);
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Self::response_to_provider_response(api_resp)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// thinking, tool_use and future block types carry no reply text
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
