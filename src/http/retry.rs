//! Retry policy for network operations with error classification.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::error::ModError;

/// Number of attempts for every network operation, including the first one.
pub const MAX_ATTEMPTS: usize = 3;

/// Delay before the first retry. Each further retry doubles it.
pub const BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Retries immediately. Meant for tests against a local server.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// A failure that would fail the same way if repeated.
#[derive(Debug, Error)]
pub enum NonRetryableError {
    #[error("HTTP {}: {hint}", .status)]
    ClientStatus {
        status: StatusCode,
        hint: &'static str,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

fn client_status_hint(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "invalid or missing credentials",
        StatusCode::FORBIDDEN => "access to this resource is forbidden",
        StatusCode::NOT_FOUND => "no such file on the server",
        StatusCode::TOO_MANY_REQUESTS => "rate limited, try again later",
        _ => "the request was rejected",
    }
}

/// 4xx responses are final. Server errors, timeouts and connection
/// failures return `None` and may be retried.
pub fn classify_error(error: &reqwest::Error) -> Option<NonRetryableError> {
    let status = error.status().filter(StatusCode::is_client_error)?;
    Some(NonRetryableError::ClientStatus {
        status,
        hint: client_status_hint(status),
    })
}

/// Wraps an `error_for_status()` failure, tagging final ones as [`NonRetryableError`].
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Some(final_error) => final_error.into(),
        None => error.into(),
    }
}

/// Transport failures are retried. Classified HTTP errors and local failures
/// (already carrying a `ModError` kind, like a failed disk write) are not.
pub fn is_retryable_error(e: &anyhow::Error) -> bool {
    let classified = e.chain().any(|cause| {
        cause.downcast_ref::<NonRetryableError>().is_some()
            || cause.downcast_ref::<ModError>().is_some()
    });
    !classified
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn status_error(status: usize) -> reqwest::Error {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(status)
            .create_async()
            .await;

        reqwest::get(server.url())
            .await
            .unwrap()
            .error_for_status()
            .unwrap_err()
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
        assert_eq!(RetryPolicy::immediate(3).delay_after(2), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_client_errors_are_final() {
        for (code, hint) in [
            (401, "credentials"),
            (403, "forbidden"),
            (404, "no such file"),
            (429, "rate limited"),
            (400, "rejected"),
        ] {
            let classified = classify_error(&status_error(code).await)
                .unwrap_or_else(|| panic!("{} should not be retried", code));
            let message = classified.to_string();
            assert!(message.starts_with(&format!("HTTP {}", code)), "{}", message);
            assert!(message.contains(hint), "{}", message);
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retryable() {
        assert!(classify_error(&status_error(500).await).is_none());
        assert!(classify_error(&status_error(503).await).is_none());
    }

    #[tokio::test]
    async fn test_check_retryable() {
        let err = check_retryable(status_error(404).await);
        assert!(!is_retryable_error(&err));

        let err = check_retryable(status_error(502).await);
        assert!(is_retryable_error(&err));
    }

    #[test]
    fn test_local_failures_are_not_retried() {
        let err = anyhow::Error::from(ModError::io("write", "/tmp/x", "disk full"));
        assert!(!is_retryable_error(&err));

        let err = anyhow::Error::from(NonRetryableError::InvalidResponse("eof".into()));
        assert!(!is_retryable_error(&err));

        let err = anyhow::anyhow!("connection reset by peer");
        assert!(is_retryable_error(&err));
    }
}
