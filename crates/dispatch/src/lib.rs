//! Reply orchestration for replyd.
//!
//! Ties the conversation store, the provider registry and the admission
//! controls together behind [`Dispatcher::generate_reply`].

pub mod cooldown;
pub mod dispatcher;
pub mod prompt;
pub mod throttle;

use std::sync::Arc;

use replyd_config::{AppConfig, ConfigError};
use replyd_memory::{ConversationStore, JsonFileBackend};

pub use cooldown::CooldownTracker;
pub use dispatcher::{Attempt, DispatchOutcome, DispatchPolicy, Dispatcher, OutcomeKind, Step};
pub use prompt::PromptBuilder;
pub use throttle::{RequestThrottle, ThrottleClosed, ThrottlePermit};

/// Build a dispatcher from configuration.
///
/// Fails only when no provider is usable; history that cannot be read is
/// logged and replaced by an empty store.
pub async fn build_from_config(config: &AppConfig) -> Result<Dispatcher, ConfigError> {
    let registry = replyd_providers::build_from_config(config)?;

    let backend = JsonFileBackend::new(config.history_path());
    let store = ConversationStore::load(Arc::new(backend), config.memory.max_history)
        .await
        .with_ttl(config.memory.ttl());

    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(store),
        Arc::new(RequestThrottle::from_config(&config.throttle)),
        Arc::new(CooldownTracker::new(config.throttle.cooldown())),
    )
    .with_policy(DispatchPolicy::from_config(config))
    .with_prompt(PromptBuilder::from_config(config))
    .with_replies(config.replies.clone());

    Ok(dispatcher)
}
