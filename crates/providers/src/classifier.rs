//! Failure classification.
//!
//! Maps a raw [`ProviderError`] onto one [`FailureKind`]. The rules are
//! status codes plus keyword matching on the error body. Upstream error
//! wording is not a stable contract, so this is approximate and the keyword
//! lists are expected to need updates as providers change their messages.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use replyd_core::error::ProviderError;
use replyd_core::failure::FailureKind;

/// Billing and account-level exhaustion.
static QUOTA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)insufficient[_ ]quota|quota|billing|insufficient[_ ](balance|credit|funds)|credit balance|out of credits|payment required",
    )
    .expect("valid quota pattern")
});

/// Per-model problems: unknown, retired or unsupported.
static MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)model[_ ]not[_ ]found|model.*does not exist|(unknown|invalid|unsupported) model|not supported|decommissioned|deprecated|no such model|model.*(unavailable|not available)",
    )
    .expect("valid model pattern")
});

/// Short-term pressure that clears with time.
static RATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate[_ ]?limit|too many requests|overloaded|capacity|slow down|throttl")
        .expect("valid rate pattern")
});

/// Backoff hints embedded in the body, e.g. "Please try again in 20s".
static RETRY_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:try again|retry) (?:in|after) (\d+(?:\.\d+)?)\s*(ms|s|sec|secs|seconds?)?\b")
        .expect("valid retry hint pattern")
});

/// Classify a failed upstream call.
pub fn classify(error: &ProviderError) -> FailureKind {
    match error {
        ProviderError::Api {
            status_code,
            message,
            retry_after_secs,
        } => classify_status(*status_code, message, *retry_after_secs),
        ProviderError::Timeout(_) | ProviderError::Network(_) => FailureKind::Transient,
        // Empty or unparseable completions are specific to the model that produced them.
        ProviderError::InvalidResponse(_) => FailureKind::ModelUnavailable,
        ProviderError::NotConfigured(_) => FailureKind::Fatal,
    }
}

fn classify_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> FailureKind {
    let rate_limited = || FailureKind::RateLimited {
        retry_after: retry_after_secs
            .map(Duration::from_secs)
            .or_else(|| retry_hint(body)),
    };

    match status {
        429 if QUOTA.is_match(body) => FailureKind::QuotaExhausted,
        429 => rate_limited(),
        // Payment required, bad credentials and forbidden all disable the whole account.
        401 | 402 | 403 => FailureKind::QuotaExhausted,
        404 => FailureKind::ModelUnavailable,
        400 | 422 if MODEL.is_match(body) => FailureKind::ModelUnavailable,
        503 if MODEL.is_match(body) => FailureKind::ModelUnavailable,
        503 | 529 if RATE.is_match(body) => rate_limited(),
        500..=599 => FailureKind::Transient,
        _ if QUOTA.is_match(body) => FailureKind::QuotaExhausted,
        _ if RATE.is_match(body) => rate_limited(),
        _ => FailureKind::Transient,
    }
}

/// Parse a retry delay out of an error body.
pub fn retry_hint(body: &str) -> Option<Duration> {
    let caps = RETRY_HINT.captures(body)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let millis = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(unit) if unit == "ms" => value,
        _ => value * 1000.0,
    };
    Some(Duration::from_millis(millis.round() as u64))
}
