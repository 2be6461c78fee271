//! Provider registry: the ordered fallback chain built from config.
//!
//! Providers are tried in registration order, and within a provider its
//! models are tried in order. The registry is built once at startup and is
//! never mutated afterwards; per-dispatch progress lives in [`AttemptCursor`].

use std::sync::Arc;

use replyd_config::{ApiKind, AppConfig, ConfigError, ProviderConfig};
use replyd_core::Provider;
use serde::Serialize;
use tracing::{info, warn};

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// One backend plus its model preference order.
pub struct RegisteredProvider {
    pub name: String,
    pub backend: Arc<dyn Provider>,
    pub models: Vec<String>,
}

/// Ordered, immutable list of providers.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider to the end of the fallback order.
    ///
    /// Providers without models are ignored since there is nothing to call.
    pub fn register(&mut self, backend: Arc<dyn Provider>, models: Vec<String>) {
        let name = backend.name().to_string();
        if models.is_empty() {
            warn!(provider = %name, "Provider has no models, skipping");
            return;
        }
        self.providers.push(RegisteredProvider {
            name,
            backend,
            models,
        });
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, backend: Arc<dyn Provider>, models: Vec<String>) -> Self {
        self.register(backend, models);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn providers(&self) -> &[RegisteredProvider] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Total number of (provider, model) pairs.
    pub fn pair_count(&self) -> usize {
        self.providers.iter().map(|p| p.models.len()).sum()
    }

    /// A fresh cursor positioned at the first model of the first provider.
    pub fn cursor(&self) -> AttemptCursor<'_> {
        AttemptCursor {
            registry: self,
            provider: 0,
            model: 0,
        }
    }

    /// Summaries in fallback order, for operator display.
    pub fn describe(&self) -> Vec<ProviderSummary> {
        self.providers
            .iter()
            .enumerate()
            .map(|(i, p)| ProviderSummary {
                position: i + 1,
                name: p.name.clone(),
                models: p.models.clone(),
            })
            .collect()
    }
}

/// Position in the (provider, model) walk of one dispatch.
///
/// The dispatcher advances it according to the failure classification:
/// by model when one model is unusable, by provider when the whole account
/// or endpoint is.
pub struct AttemptCursor<'a> {
    registry: &'a ProviderRegistry,
    provider: usize,
    model: usize,
}

/// The pair the cursor currently points at.
pub struct Target<'a> {
    pub provider: &'a RegisteredProvider,
    pub model: &'a str,
}

impl<'a> AttemptCursor<'a> {
    /// The current pair, or `None` once every provider is exhausted.
    pub fn current(&self) -> Option<Target<'a>> {
        let provider = self.registry.providers.get(self.provider)?;
        let model = provider.models.get(self.model)?;
        Some(Target {
            provider,
            model: model.as_str(),
        })
    }

    /// Move to the next model, rolling over to the next provider when the
    /// current one has no models left.
    pub fn next_model(&mut self) {
        self.model += 1;
        let exhausted = self
            .registry
            .providers
            .get(self.provider)
            .is_none_or(|p| self.model >= p.models.len());
        if exhausted {
            self.next_provider();
        }
    }

    /// Abandon the remaining models of the current provider.
    pub fn next_provider(&mut self) {
        self.provider += 1;
        self.model = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.current().is_none()
    }
}

/// Operator-facing view of one registered provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub position: usize,
    pub name: String,
    pub models: Vec<String>,
}

impl std::fmt::Display for ProviderSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}. {} → {}", self.position, self.name, self.models.join(", "))
    }
}

/// Build the registry from configuration.
///
/// Providers without a usable credential are skipped with a warning. If none
/// remain the service cannot answer anything, which is the one fatal
/// configuration error and is reported here, at startup.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRegistry, ConfigError> {
    let mut registry = ProviderRegistry::new();

    for provider_config in &config.providers {
        let Some(backend) = build_provider(provider_config) else {
            continue;
        };
        registry.register(backend, provider_config.models.clone());
    }

    if registry.is_empty() {
        let hint = config
            .providers
            .iter()
            .map(|p| p.key_env_var())
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(ConfigError::NoProviders(if hint.is_empty() {
            "no providers configured".into()
        } else {
            format!("no provider has an API key; set {hint}")
        }));
    }

    info!(
        providers = registry.len(),
        pairs = registry.pair_count(),
        order = %registry.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(" > "),
        "Provider registry ready"
    );

    Ok(registry)
}

fn build_provider(config: &ProviderConfig) -> Option<Arc<dyn Provider>> {
    let name = config.name.as_str();
    let base_url = config
        .api_url
        .clone()
        .or_else(|| default_base_url(name, config.api));

    let Some(base_url) = base_url else {
        warn!(provider = %name, "No api_url configured and no built-in default, skipping");
        return None;
    };

    let api_key = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => key.to_string(),
        None if is_local(&base_url) => String::new(),
        None => {
            warn!(
                provider = %name,
                env = %config.key_env_var(),
                "No API key configured, skipping provider"
            );
            return None;
        }
    };

    let provider: Arc<dyn Provider> = match config.api {
        ApiKind::Anthropic => Arc::new(
            AnthropicProvider::new(api_key)
                .with_base_url(base_url)
                .with_name(name),
        ),
        ApiKind::OpenAi => Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)),
    };

    Some(provider)
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str, api: ApiKind) -> Option<String> {
    if api == ApiKind::Anthropic {
        return Some("https://api.anthropic.com".into());
    }

    let url = match provider_name {
        "deepseek" => "https://api.deepseek.com/v1",
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "mistral" => "https://api.mistral.ai/v1",
        "ollama" => "http://localhost:11434/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.into())
}

/// Local inference servers usually run without authentication.
fn is_local(base_url: &str) -> bool {
    base_url.contains("://localhost") || base_url.contains("://127.0.0.1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use replyd_core::error::ProviderError;
    use replyd_core::provider::{ProviderRequest, ProviderResponse};

    struct Named(&'static str);

    #[async_trait]
    impl Provider for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured(self.0.into()))
        }
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn two_providers() -> ProviderRegistry {
        ProviderRegistry::new()
            .with(Arc::new(Named("a")), models(&["a1", "a2"]))
            .with(Arc::new(Named("b")), models(&["b1"]))
    }

    fn provider_config(name: &str, key: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            api: ApiKind::OpenAi,
            api_url: None,
            api_key: key.map(String::from),
            api_key_env: None,
            models: models(&["m1"]),
        }
    }

    #[test]
    fn cursor_walks_models_then_providers() {
        let registry = two_providers();
        let mut cursor = registry.cursor();
        let mut seen = Vec::new();
        while let Some(target) = cursor.current() {
            seen.push(format!("{}/{}", target.provider.name, target.model));
            cursor.next_model();
        }
        assert_eq!(seen, vec!["a/a1", "a/a2", "b/b1"]);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn next_provider_skips_remaining_models() {
        let registry = two_providers();
        let mut cursor = registry.cursor();
        cursor.next_provider();
        let target = cursor.current().unwrap();
        assert_eq!(target.provider.name, "b");
        assert_eq!(target.model, "b1");
    }

    #[test]
    fn providers_without_models_are_ignored() {
        let registry = ProviderRegistry::new().with(Arc::new(Named("empty")), vec![]);
        assert!(registry.is_empty());
        assert!(registry.cursor().is_exhausted());
    }

    #[test]
    fn describe_lists_in_order() {
        let summaries = two_providers().describe();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].to_string(), "1. a → a1, a2");
        assert_eq!(summaries[1].position, 2);
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("deepseek", ApiKind::OpenAi).unwrap().contains("api.deepseek.com"));
        assert!(default_base_url("openai", ApiKind::OpenAi).unwrap().contains("api.openai.com"));
        assert!(default_base_url("ollama", ApiKind::OpenAi).unwrap().contains("localhost:11434"));
        assert!(default_base_url("mystery", ApiKind::OpenAi).is_none());
    }

    #[test]
    fn keyless_providers_are_skipped() {
        let mut config = AppConfig::default();
        config.providers = vec![
            provider_config("deepseek", None),
            provider_config("openai", Some("sk-test")),
        ];
        let registry = build_from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("openai").is_some());
        assert!(registry.get("deepseek").is_none());
    }

    #[test]
    fn local_endpoint_needs_no_key() {
        let mut config = AppConfig::default();
        config.providers = vec![provider_config("ollama", None)];
        let registry = build_from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn no_usable_provider_is_fatal() {
        let mut config = AppConfig::default();
        for p in &mut config.providers {
            p.api_key = None;
        }
        match build_from_config(&config) {
            Err(ConfigError::NoProviders(msg)) => assert!(msg.contains("DEEPSEEK_API_KEY")),
            other => panic!("Expected NoProviders, got {:?}", other.err()),
        }
    }

    #[test]
    fn anthropic_kind_builds_native_adapter() {
        let mut config = AppConfig::default();
        let mut claude = provider_config("claude", Some("sk-ant"));
        claude.api = ApiKind::Anthropic;
        config.providers = vec![claude];
        let registry = build_from_config(&config).unwrap();
        assert_eq!(registry.get("claude").unwrap().backend.name(), "claude");
    }
}
