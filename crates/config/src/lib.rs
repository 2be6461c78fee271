//! Configuration loading, validation, and management for replyd.
//!
//! Loads configuration from `~/.replyd/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup so
//! a bad file fails before any traffic is accepted.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.replyd/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name the assistant introduces itself with
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// System preamble template. Placeholders: `{bot_name}`, `{user}`, `{date}`.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sampling temperature sent with every request
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per generated reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Ordered provider list; order is fallback preference
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Conversation memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Global throttle and per-sender cooldown
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Per-call timeout and retry/backoff settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// User-visible canned replies
    #[serde(default)]
    pub replies: RepliesConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_bot_name() -> String {
    "Replyd".into()
}
fn default_system_prompt() -> String {
    "You are {bot_name}, a helpful chat assistant. Current date: {date}. \
     User's name: {user}. Respond conversationally."
        .into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1500
}
fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "deepseek".into(),
            api: ApiKind::OpenAi,
            api_url: None,
            api_key: None,
            api_key_env: None,
            models: vec!["deepseek-chat".into()],
        },
        ProviderConfig {
            name: "openai".into(),
            api: ApiKind::OpenAi,
            api_url: None,
            api_key: None,
            api_key_env: None,
            models: vec!["gpt-4-turbo".into()],
        },
    ]
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bot_name", &self.bot_name)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("providers", &self.providers)
            .field("memory", &self.memory)
            .field("throttle", &self.throttle)
            .field("dispatch", &self.dispatch)
            .field("replies", &self.replies)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// Which wire format a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    /// `/chat/completions` with a flat message array
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages API with structured content blocks
    Anthropic,
}

/// One upstream backend and its model fallback order.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(default = "default_api_kind")]
    pub api: ApiKind,

    /// Base URL override; well-known names have built-in defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Env var to read the key from (default: `<NAME>_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model ids, most preferred first
    #[serde(default)]
    pub models: Vec<String>,
}

fn default_api_kind() -> ApiKind {
    ApiKind::OpenAi
}

impl ProviderConfig {
    /// The environment variable consulted for this provider's key.
    pub fn key_env_var(&self) -> String {
        self.api_key_env.clone().unwrap_or_else(|| {
            format!("{}_API_KEY", self.name.to_uppercase().replace(['-', '.', ' '], "_"))
        })
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api", &self.api)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("models", &self.models)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// History document location (default: `~/.replyd/conversation_memory.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Turns kept per conversation
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Drop turns older than this many seconds during a sweep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_max_history() -> usize {
    100
}
fn default_sweep_interval() -> u64 {
    300
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_history: default_max_history(),
            ttl_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl MemoryConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Outbound calls allowed in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum gap between two call starts
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,

    /// Token reservoir capacity; 0 disables the reservoir
    #[serde(default = "default_reservoir")]
    pub reservoir: u32,

    /// Tokens added back every refill interval
    #[serde(default = "default_reservoir")]
    pub refill_amount: u32,

    #[serde(default = "default_refill_interval")]
    pub refill_interval_secs: u64,

    /// Minimum gap between two replies to the same sender
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_max_concurrent() -> usize {
    1
}
fn default_min_spacing_ms() -> u64 {
    1000
}
fn default_reservoir() -> u32 {
    10
}
fn default_refill_interval() -> u64 {
    60
}
fn default_cooldown() -> u64 {
    5
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_spacing_ms: default_min_spacing_ms(),
            reservoir: default_reservoir(),
            refill_amount: default_reservoir(),
            refill_interval_secs: default_refill_interval(),
            cooldown_secs: default_cooldown(),
        }
    }
}

impl ThrottleConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(self.refill_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Hard timeout for a single upstream call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries of the same (provider, model) after a rate limit
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff when the upstream gives no hint
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Upper bound on any single backoff sleep
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    2000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Canned replies shown to end users. Never include upstream details here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepliesConfig {
    #[serde(default = "default_cooldown_reply")]
    pub cooldown: String,

    #[serde(default = "default_overloaded_reply")]
    pub overloaded: String,

    #[serde(default = "default_unavailable_reply")]
    pub unavailable: String,

    #[serde(default = "default_empty_input_reply")]
    pub empty_input: String,
}

fn default_cooldown_reply() -> String {
    "⏳ Please wait a moment before sending another message.".into()
}
fn default_overloaded_reply() -> String {
    "⚠️ I'm a little overloaded right now. Please try again in a few minutes.".into()
}
fn default_unavailable_reply() -> String {
    "⚠️ Sorry, I'm having trouble thinking right now. Please try again later.".into()
}
fn default_empty_input_reply() -> String {
    "👋 Send me a message and I'll reply.".into()
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            cooldown: default_cooldown_reply(),
            overloaded: default_overloaded_reply(),
            unavailable: default_unavailable_reply(),
            empty_input: default_empty_input_reply(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    25680
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.replyd/config.toml).
    ///
    /// Environment overrides are applied after the file is read:
    /// - `<NAME>_API_KEY` fills a provider key left empty in the file
    /// - `REPLYD_PREFERRED_PROVIDER` moves that provider to the front
    /// - `REPLYD_MAX_HISTORY` overrides `memory.max_history`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in &mut self.providers {
            if provider.api_key.is_none() {
                provider.api_key = lookup(&provider.key_env_var()).filter(|k| !k.is_empty());
            }
        }

        if let Some(preferred) = lookup("REPLYD_PREFERRED_PROVIDER") {
            let preferred = preferred.to_lowercase();
            if let Some(pos) = self
                .providers
                .iter()
                .position(|p| p.name.to_lowercase() == preferred)
            {
                let provider = self.providers.remove(pos);
                self.providers.insert(0, provider);
            } else {
                tracing::warn!(provider = %preferred, "Preferred provider is not configured, keeping file order");
            }
        }

        if let Some(raw) = lookup("REPLYD_MAX_HISTORY") {
            match raw.parse::<usize>() {
                Ok(n) => self.memory.max_history = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring non-numeric REPLYD_MAX_HISTORY"),
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".replyd")
    }

    /// Where the conversation history document lives.
    pub fn history_path(&self) -> PathBuf {
        self.memory
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("conversation_memory.json"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.memory.max_history == 0 {
            return Err(ConfigError::ValidationError(
                "memory.max_history must be at least 1".into(),
            ));
        }

        if self.throttle.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "throttle.max_concurrent must be at least 1".into(),
            ));
        }

        if self.throttle.reservoir > 0 {
            if self.throttle.refill_amount == 0 {
                return Err(ConfigError::ValidationError(
                    "throttle.refill_amount must be at least 1 when a reservoir is set".into(),
                ));
            }
            if self.throttle.refill_interval_secs == 0 {
                return Err(ConfigError::ValidationError(
                    "throttle.refill_interval_secs must be > 0".into(),
                ));
            }
        }

        if self.dispatch.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.timeout_secs must be > 0".into(),
            ));
        }

        if self.dispatch.backoff_ms > self.dispatch.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "dispatch.backoff_ms must not exceed dispatch.max_backoff_ms".into(),
            ));
        }

        let replies = [
            &self.replies.cooldown,
            &self.replies.overloaded,
            &self.replies.unavailable,
            &self.replies.empty_input,
        ];
        if replies.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "replies must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "provider name must not be empty".into(),
                ));
            }
            if !seen.insert(provider.name.to_lowercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate provider '{}'",
                    provider.name
                )));
            }
            if provider.models.iter().all(|m| m.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' lists no models",
                    provider.name
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `replyd config --default`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            providers: default_providers(),
            memory: MemoryConfig::default(),
            throttle: ThrottleConfig::default(),
            dispatch: DispatchConfig::default(),
            replies: RepliesConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("No usable providers: {0}")]
    NoProviders(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.providers[0].name, "deepseek");
        assert_eq!(config.providers[1].models, vec!["gpt-4-turbo".to_string()]);
        assert_eq!(config.memory.max_history, 100);
        assert_eq!(config.max_tokens, 1500);
        assert_eq!(config.gateway.port, 25680);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.providers.len(), 2);
        assert_eq!(parsed.dispatch.timeout_secs, 30);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.temperature = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_history_rejected() {
        let mut config = AppConfig::default();
        config.memory.max_history = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_reservoir_disables_refill_checks() {
        let mut config = AppConfig::default();
        config.throttle.reservoir = 0;
        config.throttle.refill_amount = 0;
        assert!(config.validate().is_ok());

        config.throttle.reservoir = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("refill_amount"));
    }

    #[test]
    fn provider_without_models_rejected() {
        let mut config = AppConfig::default();
        config.providers[0].models.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("deepseek"));
    }

    #[test]
    fn duplicate_provider_rejected() {
        let mut config = AppConfig::default();
        let copy = config.providers[0].clone();
        config.providers.push(copy);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/replyd/config.toml")).unwrap();
        assert_eq!(config.bot_name, "Replyd");
    }

    #[test]
    fn parses_ordered_provider_tables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
bot_name = "Silva"

[[providers]]
name = "anthropic"
api = "anthropic"
models = ["claude-3-5-sonnet-latest", "claude-3-5-haiku-latest"]

[[providers]]
name = "groq"
api_url = "https://api.groq.com/openai/v1"
models = ["llama-3.1-70b-versatile"]

[memory]
max_history = 3
ttl_secs = 86400

[throttle]
cooldown_secs = 10
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.bot_name, "Silva");
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].api, ApiKind::Anthropic);
        assert_eq!(config.providers[0].models.len(), 2);
        assert_eq!(config.providers[1].api, ApiKind::OpenAi);
        assert_eq!(config.memory.max_history, 3);
        assert_eq!(config.memory.ttl(), Some(Duration::from_secs(86400)));
        assert_eq!(config.throttle.cooldown(), Duration::from_secs(10));
        // untouched sections keep defaults
        assert_eq!(config.dispatch.max_retries, 2);
    }

    #[test]
    fn unknown_api_kind_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[[providers]]\nname = \"x\"\napi = \"soap\"\nmodels = [\"m\"]\n"
        )
        .unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_fills_missing_keys_only() {
        let mut config = AppConfig::default();
        config.providers[1].api_key = Some("from-file".into());
        config.apply_env(env(&[
            ("DEEPSEEK_API_KEY", "sk-deep"),
            ("OPENAI_API_KEY", "sk-open"),
        ]));
        assert_eq!(config.providers[0].api_key.as_deref(), Some("sk-deep"));
        assert_eq!(config.providers[1].api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn custom_key_env_var() {
        let mut config = AppConfig::default();
        config.providers[0].api_key_env = Some("MY_DEEPSEEK".into());
        config.apply_env(env(&[("MY_DEEPSEEK", "sk-custom")]));
        assert_eq!(config.providers[0].api_key.as_deref(), Some("sk-custom"));
    }

    #[test]
    fn preferred_provider_moves_to_front() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("REPLYD_PREFERRED_PROVIDER", "OPENAI")]));
        assert_eq!(config.providers[0].name, "openai");
        assert_eq!(config.providers[1].name, "deepseek");
    }

    #[test]
    fn unknown_preferred_provider_keeps_order() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("REPLYD_PREFERRED_PROVIDER", "mistral")]));
        assert_eq!(config.providers[0].name, "deepseek");
    }

    #[test]
    fn max_history_env_override() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("REPLYD_MAX_HISTORY", "12")]));
        assert_eq!(config.memory.max_history, 12);

        config.apply_env(env(&[("REPLYD_MAX_HISTORY", "lots")]));
        assert_eq!(config.memory.max_history, 12);
    }

    #[test]
    fn debug_output_redacts_keys() {
        let mut config = AppConfig::default();
        config.providers[0].api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml = AppConfig::default_toml();
        assert!(toml.contains("[[providers]]"));
        assert!(toml.contains("deepseek-chat"));
    }
}
