//! Error types for the replyd domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// A failed upstream call, as observed by a provider adapter.
///
/// This is raw material for the failure classifier; it says what happened on
/// the wire, not what the dispatcher should do about it.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api {
        status_code: u16,
        message: String,
        /// Backoff hint from a `Retry-After` header, if the upstream sent one.
        retry_after_secs: Option<u64>,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Shorthand for an HTTP error without a retry hint.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// HTTP status code, if the failure came with one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Conversation history persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to serialize history: {0}")]
    Serialization(String),

    #[error("History document is corrupt: {0}")]
    Corrupt(String),
}
