//! Shared HTTP plumbing for the provider adapters.

use replyd_core::error::ProviderError;
use tracing::warn;

/// Map a transport-level reqwest failure onto a [`ProviderError`].
pub(crate) fn send_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(format!("{provider}: {err}"))
    } else {
        ProviderError::Network(format!("{provider}: {err}"))
    }
}

/// Turn a non-success response into a [`ProviderError::Api`], keeping the
/// body for the classifier and any `Retry-After` hint for the backoff.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status_code = response.status().as_u16();
    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    warn!(provider, status = status_code, body = %body, "Provider returned error");

    ProviderError::Api {
        status_code,
        message: body,
        retry_after_secs,
    }
}
