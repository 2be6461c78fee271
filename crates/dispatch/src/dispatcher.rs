//! The reply dispatcher.
//!
//! One dispatch walks the provider registry in order:
//!
//! ```text
//! cooldown check → history → prompt → (provider, model)* → reply | fallback
//! ```
//!
//! Each upstream call yields a [`Step`] that says how the walk continues.
//! Upstream trouble never escapes as an error; the caller always receives
//! a displayable reply.

use std::sync::Arc;
use std::time::Duration;

use replyd_config::{AppConfig, RepliesConfig};
use replyd_core::error::ProviderError;
use replyd_core::failure::FailureKind;
use replyd_core::message::Message;
use replyd_core::provider::{ProviderRequest, ProviderResponse};
use replyd_memory::ConversationStore;
use replyd_providers::{ProviderRegistry, RegisteredProvider, classify};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cooldown::CooldownTracker;
use crate::prompt::PromptBuilder;
use crate::throttle::RequestThrottle;

/// Retry, timeout and request parameters for upstream calls.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl DispatchPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeout: config.dispatch.timeout(),
            max_retries: config.dispatch.max_retries,
            backoff: config.dispatch.backoff(),
            max_backoff: config.dispatch.max_backoff(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
        }
    }

    /// Delay before retry number `retry` (0-based) of the same pair.
    ///
    /// An upstream hint wins when present; otherwise the base backoff
    /// doubles per retry. Both are capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let delay = hint.unwrap_or_else(|| {
            self.backoff
                .saturating_mul(2u32.saturating_pow(retry))
        });
        delay.min(self.max_backoff)
    }

    /// The transition for a failed call.
    pub fn next_step(&self, kind: FailureKind, retries: u32) -> Step {
        match kind {
            FailureKind::RateLimited { retry_after } if retries < self.max_retries => {
                Step::RetrySame(self.backoff_for(retries, retry_after))
            }
            FailureKind::RateLimited { .. } | FailureKind::ModelUnavailable => Step::NextModel,
            FailureKind::QuotaExhausted | FailureKind::Transient => Step::NextProvider,
            FailureKind::Fatal => Step::Fatal,
        }
    }
}

/// What happens after one upstream call.
#[derive(Debug)]
pub enum Step {
    Success(ProviderResponse),
    /// Sleep, then call the same (provider, model) again.
    RetrySame(Duration),
    NextModel,
    NextProvider,
    Fatal,
}

/// One upstream call made during a dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub provider: String,
    pub model: String,
    /// `None` when the call succeeded.
    pub failure: Option<FailureKind>,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// A provider produced the reply.
    Replied,
    /// The sender was served too recently.
    Cooldown,
    /// Nothing to answer.
    EmptyInput,
    /// Every pair failed and at least one failure was capacity-related.
    Overloaded,
    /// Every pair failed for other reasons, or the dispatch aborted.
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    /// Always non-empty and safe to show to the end user.
    pub reply: String,
    pub kind: OutcomeKind,
    pub attempts: Vec<Attempt>,
}

impl DispatchOutcome {
    pub fn upstream_calls(&self) -> usize {
        self.attempts.len()
    }
}

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    store: Arc<ConversationStore>,
    throttle: Arc<RequestThrottle>,
    cooldown: Arc<CooldownTracker>,
    prompt: PromptBuilder,
    policy: DispatchPolicy,
    replies: RepliesConfig,
}

impl Dispatcher {
    /// Create a dispatcher with default policy, prompt and replies.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<ConversationStore>,
        throttle: Arc<RequestThrottle>,
        cooldown: Arc<CooldownTracker>,
    ) -> Self {
        let defaults = AppConfig::default();
        Self {
            registry,
            store,
            throttle,
            cooldown,
            prompt: PromptBuilder::from_config(&defaults),
            policy: DispatchPolicy::from_config(&defaults),
            replies: defaults.replies,
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_replies(mut self, replies: RepliesConfig) -> Self {
        self.replies = replies;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cooldown(&self) -> &Arc<CooldownTracker> {
        &self.cooldown
    }

    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.throttle
    }

    /// Stop admitting upstream calls. Dispatches still waiting on the
    /// throttle, and any started later, end with the unavailable reply.
    pub fn shutdown(&self) {
        self.throttle.close();
        info!("Dispatcher closed to new upstream calls");
    }

    /// Produce the reply text for one inbound turn.
    pub async fn generate_reply(&self, conversation_id: &str, text: &str) -> String {
        self.dispatch(conversation_id, text).await.reply
    }

    /// Like [`generate_reply`](Self::generate_reply), with the attempt log.
    pub async fn dispatch(&self, conversation_id: &str, text: &str) -> DispatchOutcome {
        let text = text.trim();
        if text.is_empty() {
            return self.canned(OutcomeKind::EmptyInput, Vec::new());
        }

        if let Some(remaining) = self.cooldown.remaining(conversation_id) {
            info!(
                conversation = %conversation_id,
                remaining_ms = remaining.as_millis() as u64,
                "Sender is cooling down"
            );
            return self.canned(OutcomeKind::Cooldown, Vec::new());
        }

        let history = self.store.get_history(conversation_id).await;
        let messages = self.prompt.build(conversation_id, &history, text);
        debug!(
            conversation = %conversation_id,
            history = history.len(),
            "Prompt built"
        );

        let mut attempts = Vec::new();
        let mut capacity_failure = false;
        let mut retries = 0u32;
        let mut cursor = self.registry.cursor();

        while let Some(target) = cursor.current() {
            let result = match self.throttle.acquire().await {
                Ok(_permit) => self.call(target.provider, target.model, &messages).await,
                Err(closed) => {
                    error!(error = %closed, "Dispatch aborted");
                    return self.canned(OutcomeKind::Unavailable, attempts);
                }
            };

            let step = match result {
                Ok(response) => Step::Success(response),
                Err(err) => {
                    let kind = classify(&err);
                    capacity_failure |= kind.is_capacity();
                    warn!(
                        provider = %target.provider.name,
                        model = %target.model,
                        attempt = attempts.len() + 1,
                        failure = %kind,
                        error = %err,
                        "Provider attempt failed"
                    );
                    attempts.push(Attempt {
                        provider: target.provider.name.clone(),
                        model: target.model.to_string(),
                        failure: Some(kind),
                    });
                    self.policy.next_step(kind, retries)
                }
            };

            match step {
                Step::Success(response) => {
                    attempts.push(Attempt {
                        provider: target.provider.name.clone(),
                        model: target.model.to_string(),
                        failure: None,
                    });
                    self.store
                        .append_exchange(conversation_id, text, response.content.as_str())
                        .await;
                    self.cooldown.mark_served(conversation_id);
                    info!(
                        conversation = %conversation_id,
                        provider = %target.provider.name,
                        model = %response.model,
                        attempts = attempts.len(),
                        "Reply generated"
                    );
                    return DispatchOutcome {
                        reply: response.content,
                        kind: OutcomeKind::Replied,
                        attempts,
                    };
                }
                Step::RetrySame(delay) => {
                    retries += 1;
                    debug!(
                        provider = %target.provider.name,
                        model = %target.model,
                        delay_ms = delay.as_millis() as u64,
                        retry = retries,
                        "Backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Step::NextModel => {
                    retries = 0;
                    cursor.next_model();
                }
                Step::NextProvider => {
                    retries = 0;
                    cursor.next_provider();
                }
                Step::Fatal => {
                    error!(
                        conversation = %conversation_id,
                        provider = %target.provider.name,
                        "Unrecoverable provider failure, aborting dispatch"
                    );
                    return self.canned(OutcomeKind::Unavailable, attempts);
                }
            }
        }

        if attempts.is_empty() {
            error!("No providers registered, cannot dispatch");
        }

        let kind = if capacity_failure {
            OutcomeKind::Overloaded
        } else {
            OutcomeKind::Unavailable
        };
        warn!(
            conversation = %conversation_id,
            attempts = attempts.len(),
            outcome = ?kind,
            "All providers failed, sending fallback reply"
        );
        self.canned(kind, attempts)
    }

    async fn call(
        &self,
        provider: &RegisteredProvider,
        model: &str,
        messages: &[Message],
    ) -> Result<ProviderResponse, ProviderError> {
        let request = ProviderRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: self.policy.temperature,
            max_tokens: self.policy.max_tokens,
        };

        debug!(provider = %provider.name, model = %model, "Calling provider");

        match tokio::time::timeout(self.policy.timeout, provider.backend.complete(request)).await {
            Ok(Ok(response)) if response.content.trim().is_empty() => Err(
                ProviderError::InvalidResponse(format!("{} returned a blank completion", provider.name)),
            ),
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "{} did not answer within {}s",
                provider.name,
                self.policy.timeout.as_secs_f32()
            ))),
        }
    }

    fn canned(&self, kind: OutcomeKind, attempts: Vec<Attempt>) -> DispatchOutcome {
        let reply = match kind {
            OutcomeKind::Cooldown => &self.replies.cooldown,
            OutcomeKind::EmptyInput => &self.replies.empty_input,
            OutcomeKind::Overloaded => &self.replies.overloaded,
            OutcomeKind::Replied | OutcomeKind::Unavailable => &self.replies.unavailable,
        };
        DispatchOutcome {
            reply: reply.clone(),
            kind,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use replyd_core::provider::Provider;
    use replyd_memory::InMemoryBackend;

    fn policy() -> DispatchPolicy {
        DispatchPolicy {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            temperature: 0.7,
            max_tokens: Some(1500),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_for(0, None), Duration::from_secs(2));
        assert_eq!(p.backoff_for(1, None), Duration::from_secs(4));
        assert_eq!(p.backoff_for(10, None), Duration::from_secs(30));
    }

    #[test]
    fn hint_wins_but_is_capped() {
        let p = policy();
        assert_eq!(p.backoff_for(3, Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(p.backoff_for(0, Some(Duration::from_secs(600))), Duration::from_secs(30));
    }

    #[test]
    fn rate_limit_retries_then_moves_to_next_model() {
        let p = policy();
        let kind = FailureKind::RateLimited { retry_after: None };
        assert!(matches!(p.next_step(kind, 0), Step::RetrySame(d) if d == Duration::from_secs(2)));
        assert!(matches!(p.next_step(kind, 1), Step::RetrySame(d) if d == Duration::from_secs(4)));
        assert!(matches!(p.next_step(kind, 2), Step::NextModel));
    }

    #[test]
    fn failure_kinds_map_to_transitions() {
        let p = policy();
        assert!(matches!(p.next_step(FailureKind::QuotaExhausted, 0), Step::NextProvider));
        assert!(matches!(p.next_step(FailureKind::ModelUnavailable, 0), Step::NextModel));
        assert!(matches!(p.next_step(FailureKind::Transient, 0), Step::NextProvider));
        assert!(matches!(p.next_step(FailureKind::Fatal, 0), Step::Fatal));
    }

    /// Answers whitespace for `blank`, real text for any other model.
    struct BlankFirst;

    #[async_trait]
    impl Provider for BlankFirst {
        fn name(&self) -> &str {
            "blank-first"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let content = if request.model == "blank" { "  \n " } else { "real answer" };
            Ok(ProviderResponse {
                content: content.into(),
                model: request.model,
                usage: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blank_completion_falls_through_to_next_model() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(BlankFirst), vec!["blank".into(), "solid".into()]);
        let store = Arc::new(ConversationStore::load(Arc::new(InMemoryBackend::new()), 10).await);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::clone(&store),
            Arc::new(RequestThrottle::new(1, Duration::ZERO)),
            Arc::new(CooldownTracker::new(Duration::from_secs(5))),
        );

        let outcome = dispatcher.dispatch("alice", "hello").await;

        assert_eq!(outcome.kind, OutcomeKind::Replied);
        assert_eq!(outcome.reply, "real answer");
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].failure, Some(FailureKind::ModelUnavailable));
        assert_eq!(store.get_history("alice").await[1].content, "real answer");
    }

    #[tokio::test]
    async fn shutdown_refuses_further_calls() {
        let registry = ProviderRegistry::new().with(Arc::new(BlankFirst), vec!["solid".into()]);
        let store = Arc::new(ConversationStore::load(Arc::new(InMemoryBackend::new()), 10).await);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::clone(&store),
            Arc::new(RequestThrottle::new(1, Duration::ZERO)),
            Arc::new(CooldownTracker::new(Duration::from_secs(5))),
        );

        dispatcher.shutdown();
        let outcome = dispatcher.dispatch("alice", "hello").await;

        assert_eq!(outcome.kind, OutcomeKind::Unavailable);
        assert_eq!(outcome.upstream_calls(), 0);
        assert!(store.get_history("alice").await.is_empty());
        assert!(!dispatcher.cooldown().is_cooling_down("alice"));
    }

    #[test]
    fn outcome_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(OutcomeKind::EmptyInput).unwrap(),
            serde_json::json!("empty_input")
        );
    }
}
