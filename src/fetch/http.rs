// src/fetch/http.rs

//! Static fetch strategy: one GET per run with bounded retries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER,
};

use crate::error::{AppError, Result};
use crate::fetch::Fetcher;
use crate::fetch::retry::{RetryPolicy, parse_retry_after};
use crate::models::{FetchConfig, SourceDescriptor};

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &FetchConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&config.accept_language)
            .map_err(|e| AppError::config(format!("fetch.accept_language: {e}")))?,
    );

    let client = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Outcome of a single failed attempt.
enum AttemptError {
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    Fatal(String),
}

/// Fetches listing pages over plain HTTP(S).
pub struct StaticFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl StaticFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    /// Use an existing client and policy.
    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    fn source_headers(source: &SourceDescriptor) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &source.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                AppError::config(format!("source '{}': header '{name}': {e}", source.id))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                AppError::config(format!("source '{}': header value: {e}", source.id))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    async fn attempt(
        &self,
        source: &SourceDescriptor,
        headers: &HeaderMap,
    ) -> std::result::Result<String, AttemptError> {
        let response = self
            .client
            .get(&source.url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP status {status}");
            if RetryPolicy::is_retryable_status(status) {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, Utc::now()));
                return Err(AttemptError::Transient {
                    message,
                    retry_after,
                });
            }
            return Err(AttemptError::Fatal(message));
        }

        response.text().await.map_err(classify_transport)
    }
}

fn classify_transport(error: reqwest::Error) -> AttemptError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        AttemptError::Transient {
            message: error.to_string(),
            retry_after: None,
        }
    } else {
        AttemptError::Fatal(error.to_string())
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<String> {
        let headers = Self::source_headers(source)?;
        let mut attempt = 1;

        loop {
            match self.attempt(source, &headers).await {
                Ok(body) => {
                    log::debug!(
                        "[{}] fetched {} bytes on attempt {}",
                        source.id,
                        body.len(),
                        attempt
                    );
                    return Ok(body);
                }
                Err(AttemptError::Fatal(message)) => {
                    return Err(AppError::fetch(&source.url, message));
                }
                Err(AttemptError::Transient {
                    message,
                    retry_after,
                }) => {
                    if !self.retry.should_retry(attempt) {
                        return Err(AppError::fetch(
                            &source.url,
                            format!("{message} (gave up after {attempt} attempts)"),
                        ));
                    }
                    let delay = self.retry.delay_for(attempt, retry_after);
                    log::warn!(
                        "[{}] attempt {} failed: {}; retrying in {:?}",
                        source.id,
                        attempt,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
