//! HTTP client with retry, backoff and cancellation.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::io::Write;
use tokio_util::sync::CancellationToken;

use super::retry::{NonRetryableError, RetryPolicy, check_retryable, is_retryable_error};
use crate::error::ModError;

/// HTTP client with built-in retry logic for network operations.
///
/// Every operation observes a [`CancellationToken`]: a cancelled token aborts
/// the in-flight request and any pending backoff with [`ModError::Cancelled`].
/// Failures that survive all attempts surface as [`ModError::Network`].
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Performs a GET request and deserializes the JSON response.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        debug!("GET JSON from {}...", url);

        self.with_retry(url, cancel, || async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .context("Failed to send request")?;

            let response = response.error_for_status().map_err(check_retryable)?;

            let body = response
                .bytes()
                .await
                .context("Failed to read response body")?;

            serde_json::from_slice::<T>(&body)
                .map_err(|e| anyhow::Error::from(NonRetryableError::InvalidResponse(e.to_string())))
        })
        .await
    }

    /// Downloads a URL into the writer returned by `create_writer`.
    /// The writer is created anew for every attempt.
    #[tracing::instrument(skip(self, create_writer, cancel))]
    pub async fn download_file<W, F>(
        &self,
        url: &str,
        create_writer: F,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        debug!("Downloading file from {}...", url);
        let create_writer = &create_writer;

        self.with_retry(url, cancel, || async move {
            self.download_file_once(url, create_writer).await
        })
        .await
    }

    /// Single download attempt without retry.
    async fn download_file_once<W, F>(&self, url: &str, create_writer: &F) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;

        let mut response = response.error_for_status().map_err(check_retryable)?;

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            writer
                .write_all(&chunk)
                .map_err(|e| ModError::io("write download of", url, e))?;
            downloaded_bytes += chunk.len() as u64;
        }
        writer
            .flush()
            .map_err(|e| ModError::io("write download of", url, e))?;

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }

    /// Executes an async operation under the retry policy.
    async fn with_retry<F, Fut, T>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ModError::Cancelled.into());
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ModError::Cancelled.into()),
                outcome = operation() => outcome,
            };

            let e = match outcome {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if e.chain().any(|c| c.downcast_ref::<ModError>().is_some()) {
                return Err(e);
            }

            if !is_retryable_error(&e) || attempt >= max_attempts {
                debug!("{}: giving up after attempt {}: {:#}", url, attempt, e);
                return Err(ModError::Network {
                    url: url.to_string(),
                    attempts: attempt,
                    message: format!("{:#}", e),
                }
                .into());
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                "{}: attempt {}/{} failed ({:#}), retrying in {}ms...",
                url,
                attempt,
                max_attempts,
                e,
                delay.as_millis()
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ModError::Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
