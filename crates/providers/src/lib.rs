//! Upstream chat-completion providers for replyd.
//!
//! All adapters implement the `replyd_core::Provider` trait. The registry
//! holds them in fallback order and the classifier turns their failures
//! into the categories the dispatcher acts on.

pub mod anthropic;
pub mod classifier;
mod http;
pub mod openai_compat;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use classifier::classify;
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{
    AttemptCursor, ProviderRegistry, ProviderSummary, RegisteredProvider, Target,
    build_from_config,
};
