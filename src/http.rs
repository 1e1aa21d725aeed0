//! JSON-over-HTTP calls with retry, shared by the embedding and completion
//! providers.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5), or the server's
//!   `Retry-After` when it sends one

use std::time::Duration;

use reqwest::header::HeaderValue;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::warn;

use crate::error::{CoderError, Result, Service};

pub(crate) fn build_client(service: Service, timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CoderError::config(format!("failed to build {} HTTP client: {}", service, e)))
}

/// Send the request produced by `request` until it succeeds or `max_retries`
/// retries are spent, and decode the response body as JSON.
///
/// `label` names the upstream in error messages (e.g. `"OpenAI"`).
pub(crate) async fn send_json<F>(
    request: F,
    max_retries: u32,
    service: Service,
    label: &str,
) -> Result<serde_json::Value>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        let resp = request().send().await;

        let retry_after = match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        CoderError::upstream(service, format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let retry_after = response.headers().get("retry-after").cloned();
                let body_text = response.text().await.unwrap_or_default();
                let err = CoderError::upstream(
                    service,
                    format!("{} API error {}: {}", label, status, body_text),
                );
                if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                    return Err(err);
                }
                last_err = Some(err);
                retry_after
            }
            Err(e) => {
                last_err = Some(CoderError::upstream(
                    service,
                    format!("{} request failed: {}", label, e),
                ));
                None
            }
        };

        if attempt < max_retries {
            let delay = backoff_delay(attempt + 1, retry_after.as_ref());
            warn!(
                service = %service,
                attempt = attempt + 1,
                delay_secs = delay.as_secs(),
                "{} call failed, retrying",
                label
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(last_err.unwrap_or_else(|| {
        CoderError::upstream(service, format!("{} call failed after retries", label))
    }))
}

/// Delay before retry number `attempt` (1-based).
pub(crate) fn backoff_delay(attempt: u32, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs.max(1));
    }
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}
