//! Source-fallback orchestration.
//!
//! One logical resource is tried against each source in fallback order,
//! strictly one attempt at a time. Transient failures are retried on the
//! same source with backoff; integrity failures move straight to the next
//! source; local I/O errors and cancellation end the whole chain.

use crate::game::installer::config::EngineConfig;
use crate::game::installer::core::downloader::{
    download_to_memory, download_to_path, post_to_memory, Attempt, Expected,
};
use crate::game::installer::error::{ErrorClass, FallbackFailure, FetchError, SourceError};
use crate::game::installer::sources::{DownloadSource, ResourceClass, SourceCatalog};
use crate::game::installer::types::{CancelToken, ProgressReporter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const CURSEFORGE_API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// base, 2*base, 4*base, ...
    Exponential(Duration),
    /// step, 2*step, 3*step, ...
    Linear(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts against a single source, first try included.
    pub attempts_per_source: u32,
    pub backoff: Backoff,
    /// Per-attempt deadline covering headers and body.
    pub timeout: Duration,
    pub fallback_on_client_error: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            attempts_per_source: config.max_retries_per_source.saturating_add(1),
            backoff: Backoff::Exponential(Duration::from_millis(config.retry_base_delay_ms)),
            timeout: config.request_timeout(),
            fallback_on_client_error: config.fallback_on_client_error,
        }
    }

    /// Short timeout, few quick retries.
    pub fn asset_pass(config: &EngineConfig) -> Self {
        Self {
            attempts_per_source: config.assets.retries.max(1),
            backoff: Backoff::Linear(Duration::from_millis(config.assets.retry_delay_ms)),
            timeout: Duration::from_secs(config.assets.timeout_secs),
            fallback_on_client_error: config.fallback_on_client_error,
        }
    }

    /// Longer timeout, more retries, exponential backoff.
    pub fn sweep_pass(config: &EngineConfig) -> Self {
        Self {
            attempts_per_source: config.sweep.retries.max(1),
            backoff: Backoff::Exponential(Duration::from_millis(config.sweep.backoff_base_ms)),
            timeout: Duration::from_secs(config.sweep.timeout_secs),
            fallback_on_client_error: config.fallback_on_client_error,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let n = retry.max(1);
        match self.backoff {
            Backoff::Exponential(base) => {
                base.saturating_mul(2u32.saturating_pow(n.saturating_sub(1)))
            }
            Backoff::Linear(step) => step.saturating_mul(n),
        }
    }
}

/// Logical resource: the upstream URL plus how to transform and verify it.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub url: String,
    pub class: ResourceClass,
    pub expected: Expected,
}

impl ResourceRequest {
    pub fn new(class: ResourceClass, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            class,
            expected: Expected::none(),
        }
    }

    pub fn expect(mut self, digest: Option<&str>, size: Option<u64>) -> Self {
        self.expected = Expected::new(digest, size);
        self
    }
}

/// Successful fallback outcome.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub used_source: String,
    pub attempted_sources: Vec<String>,
}

/// Drives single-URL fetches across the configured sources.
#[derive(Clone)]
pub struct FallbackDownloader {
    client: Client,
    order: Arc<Vec<Arc<DownloadSource>>>,
    policy: RetryPolicy,
    api_key: Option<String>,
    cancel: CancelToken,
}

impl FallbackDownloader {
    /// The source order is computed here, once, from the configuration.
    pub fn new(
        client: Client,
        catalog: &SourceCatalog,
        config: &EngineConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            order: Arc::new(catalog.order_for(&config.sources)),
            policy: RetryPolicy::from_config(config),
            api_key: config.curseforge_api_key.clone(),
            cancel,
        }
    }

    /// Same sources and cancellation, different retry behaviour.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn source_keys(&self) -> Vec<String> {
        self.order.iter().map(|s| s.key().to_string()).collect()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fetch to `target`; the file only appears there once verified.
    pub async fn fetch_file(
        &self,
        request: &ResourceRequest,
        target: &Path,
        reporter: Option<&dyn ProgressReporter>,
    ) -> Result<Fetched<PathBuf>, FallbackFailure> {
        self.run(request, |url, headers| {
            let client = self.client.clone();
            let cancel = self.cancel.clone();
            let expected = request.expected.clone();
            let timeout = self.policy.timeout;
            let target = target.to_path_buf();
            async move {
                let attempt = Attempt {
                    url: &url,
                    headers,
                    timeout,
                };
                download_to_path(&client, &attempt, &target, &expected, &cancel, reporter)
                    .await
                    .map(|_| target)
            }
        })
        .await
    }

    pub async fn fetch_bytes(
        &self,
        request: &ResourceRequest,
    ) -> Result<Fetched<Vec<u8>>, FallbackFailure> {
        self.run(request, |url, headers| {
            let client = self.client.clone();
            let cancel = self.cancel.clone();
            let expected = request.expected.clone();
            let timeout = self.policy.timeout;
            async move {
                let attempt = Attempt {
                    url: &url,
                    headers,
                    timeout,
                };
                download_to_memory(&client, &attempt, &expected, &cancel).await
            }
        })
        .await
    }

    pub async fn fetch_text(
        &self,
        request: &ResourceRequest,
    ) -> Result<Fetched<String>, FallbackFailure> {
        self.run(request, |url, headers| {
            let client = self.client.clone();
            let cancel = self.cancel.clone();
            let expected = request.expected.clone();
            let timeout = self.policy.timeout;
            async move {
                let attempt = Attempt {
                    url: &url,
                    headers,
                    timeout,
                };
                let bytes = download_to_memory(&client, &attempt, &expected, &cancel).await?;
                String::from_utf8(bytes).map_err(|e| FetchError::Decode {
                    url: url.clone(),
                    message: e.to_string(),
                })
            }
        })
        .await
    }

    /// A body that does not parse counts against that source like a digest
    /// mismatch, and the next source is tried.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &ResourceRequest,
    ) -> Result<Fetched<T>, FallbackFailure> {
        self.run(request, |url, headers| {
            let client = self.client.clone();
            let cancel = self.cancel.clone();
            let expected = request.expected.clone();
            let timeout = self.policy.timeout;
            async move {
                let attempt = Attempt {
                    url: &url,
                    headers,
                    timeout,
                };
                let bytes = download_to_memory(&client, &attempt, &expected, &cancel).await?;
                serde_json::from_slice::<T>(&bytes).map_err(|e| FetchError::Decode {
                    url: url.clone(),
                    message: e.to_string(),
                })
            }
        })
        .await
    }

    /// POST `body` and decode the JSON reply. The request's expectation is
    /// ignored; replies are checked only by parsing.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        request: &ResourceRequest,
        body: &serde_json::Value,
    ) -> Result<Fetched<T>, FallbackFailure> {
        self.run(request, |url, headers| {
            let client = self.client.clone();
            let cancel = self.cancel.clone();
            let timeout = self.policy.timeout;
            async move {
                let attempt = Attempt {
                    url: &url,
                    headers,
                    timeout,
                };
                let bytes = post_to_memory(&client, &attempt, body, &cancel).await?;
                serde_json::from_slice::<T>(&bytes).map_err(|e| FetchError::Decode {
                    url: url.clone(),
                    message: e.to_string(),
                })
            }
        })
        .await
    }

    fn headers_for(&self, source: &DownloadSource, class: ResourceClass) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(ua) = source.user_agent() {
            match HeaderValue::from_str(ua) {
                Ok(v) => {
                    headers.insert(USER_AGENT, v);
                }
                Err(_) => log::warn!("[fallback] invalid user agent for '{}'", source.key()),
            }
        }
        if class == ResourceClass::CurseforgeApi && source.include_api_key() {
            if let Some(key) = &self.api_key {
                if let Ok(v) = HeaderValue::from_str(key) {
                    headers.insert(HeaderName::from_static(CURSEFORGE_API_KEY_HEADER), v);
                }
            }
        }
        headers
    }

    async fn run<T, F, Fut>(
        &self,
        request: &ResourceRequest,
        mut attempt: F,
    ) -> Result<Fetched<T>, FallbackFailure>
    where
        F: FnMut(String, HeaderMap) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempted: Vec<String> = Vec::new();
        let mut errors: Vec<SourceError> = Vec::new();
        let attempts = self.policy.attempts_per_source.max(1);

        for source in self.order.iter() {
            if self.cancel.is_cancelled() {
                return Err(FallbackFailure {
                    attempted_sources: attempted,
                    errors,
                    fatal: Some(FetchError::Cancelled),
                });
            }

            let key = source.key().to_string();
            let url = source.transform(request.class, &request.url);
            let headers = self.headers_for(source, request.class);
            attempted.push(key.clone());

            let mut try_no: u32 = 0;
            let last_error = loop {
                try_no += 1;
                log::debug!(
                    "[fallback] {} via '{}' (attempt {}/{}): {}",
                    request.class.as_str(),
                    key,
                    try_no,
                    attempts,
                    url
                );

                let err = match attempt(url.clone(), headers.clone()).await {
                    Ok(value) => {
                        if attempted.len() > 1 {
                            log::info!(
                                "[fallback] {} recovered via '{}' after {:?}",
                                request.url,
                                key,
                                &attempted[..attempted.len() - 1]
                            );
                        }
                        return Ok(Fetched {
                            value,
                            used_source: key,
                            attempted_sources: attempted,
                        });
                    }
                    Err(e) => e,
                };

                match err.class() {
                    ErrorClass::Fatal => {
                        log::warn!("[fallback] aborting {}: {}", request.url, err);
                        errors.push(SourceError {
                            source: key,
                            message: err.to_string(),
                        });
                        return Err(FallbackFailure {
                            attempted_sources: attempted,
                            errors,
                            fatal: Some(err),
                        });
                    }
                    ErrorClass::Integrity => break err,
                    ErrorClass::ClientError => {
                        if !self.policy.fallback_on_client_error {
                            errors.push(SourceError {
                                source: key,
                                message: err.to_string(),
                            });
                            log::warn!("[fallback] {} rejected by client error", request.url);
                            return Err(FallbackFailure {
                                attempted_sources: attempted,
                                errors,
                                fatal: None,
                            });
                        }
                        break err;
                    }
                    ErrorClass::Transient => {
                        if try_no >= attempts {
                            break err;
                        }
                        let delay = self.policy.delay_for(try_no);
                        log::debug!(
                            "[fallback] '{}' failed ({}), retrying in {:?}",
                            key,
                            err,
                            delay
                        );
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => {
                                errors.push(SourceError { source: key, message: err.to_string() });
                                return Err(FallbackFailure {
                                    attempted_sources: attempted,
                                    errors,
                                    fatal: Some(FetchError::Cancelled),
                                });
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            };

            log::debug!("[fallback] '{}' gave up on {}: {}", key, request.url, last_error);
            errors.push(SourceError {
                source: key,
                message: last_error.to_string(),
            });
        }

        let failure = FallbackFailure {
            attempted_sources: attempted,
            errors,
            fatal: None,
        };
        log::warn!("[fallback] all sources failed for {}: {}", request.url, failure);
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delays_double() {
        let policy = RetryPolicy {
            attempts_per_source: 5,
            backoff: Backoff::Exponential(Duration::from_secs(2)),
            timeout: Duration::from_secs(60),
            fallback_on_client_error: true,
        };
        let delays: Vec<u64> = (1..=4).map(|r| policy.delay_for(r).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16]);
    }

    #[test]
    fn linear_delays_step() {
        let policy = RetryPolicy::asset_pass(&EngineConfig::default());
        assert_eq!(policy.attempts_per_source, 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[test]
    fn default_policy_has_three_attempts() {
        let policy = RetryPolicy::from_config(&EngineConfig::default());
        assert_eq!(policy.attempts_per_source, 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn huge_retry_counts_saturate() {
        let policy = RetryPolicy::from_config(&EngineConfig::default());
        assert!(policy.delay_for(200) >= Duration::from_secs(1));
    }

    #[test]
    fn source_order_follows_config() {
        let mut config = EngineConfig::default();
        config.sources.primary = "bmclapi".into();
        let fd = FallbackDownloader::new(
            Client::new(),
            &SourceCatalog::builtin(),
            &config,
            CancelToken::never(),
        );
        assert_eq!(fd.source_keys(), vec!["bmclapi", "official", "mcim"]);
    }
}
