//! Semantic failure categories.
//!
//! The classifier in `replyd-providers` maps every [`ProviderError`] onto
//! exactly one [`FailureKind`]; the dispatcher decides what to do next from
//! the kind alone.
//!
//! [`ProviderError`]: crate::error::ProviderError

use serde::Serialize;
use std::time::Duration;

/// What a failed upstream call means for the rest of the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureKind {
    /// Retry the same (provider, model) after a backoff.
    RateLimited {
        #[serde(skip)]
        retry_after: Option<Duration>,
    },
    /// The provider account cannot serve any model; move to the next provider.
    QuotaExhausted,
    /// This model cannot serve; try the next model of the same provider.
    ModelUnavailable,
    /// Timeout, network error or unrecognized server failure; next provider.
    Transient,
    /// Abort the whole dispatch.
    Fatal,
}

impl FailureKind {
    /// Whether the failure reflects capacity pressure rather than an outage.
    ///
    /// Used to pick between the "busy" and "unavailable" fallback replies.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::QuotaExhausted)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ModelUnavailable => "model_unavailable",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
