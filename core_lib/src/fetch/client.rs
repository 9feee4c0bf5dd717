//! Outbound HTTP with a bounded timeout and retry on transport failures.

use reqwest::{header::HeaderMap, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::retry::{retry, RetryConfig, RetryableError};
use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempts: {source}")]
    Exhausted {
        url: String,
        attempts: u32,
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Overrides the fetcher's default timeout for this call.
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryConfig,
    timeout: Duration,
}

pub fn user_agent() -> String {
    format!("watchpost/{}", env!("CARGO_PKG_VERSION"))
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self::with_client(
            client,
            RetryConfig::from(config),
            Duration::from_secs(config.timeout_seconds),
        ))
    }

    pub fn with_client(client: Client, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            client,
            retry,
            timeout,
        }
    }

    /// Default per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request(&self, url: &str, method: Method, options: &FetchOptions) -> RequestBuilder {
        self.client
            .request(method, url)
            .timeout(options.timeout.unwrap_or(self.timeout))
    }

    fn wrap(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_retryable() {
            FetchError::Exhausted {
                url: url.to_string(),
                attempts: self.retry.max_attempts,
                source: err,
            }
        } else {
            FetchError::Request {
                url: url.to_string(),
                source: err,
            }
        }
    }

    /// Sends one request, retrying transient transport errors. Non-2xx responses
    /// are returned untouched for the caller to interpret.
    pub async fn fetch(
        &self,
        url: &str,
        method: Method,
        options: &FetchOptions,
    ) -> Result<Response, FetchError> {
        debug!("Fetch {} {}", method, url);

        retry(&self.retry, || {
            let method = method.clone();
            async move { self.request(url, method, options).send().await }
        })
        .await
        .map_err(|e| self.wrap(url, e))
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        debug!("Fetch JSON from {}", url);
        let options = FetchOptions::default();

        retry(&self.retry, || {
            let options = &options;
            async move {
                let response = self.request(url, Method::GET, options).send().await?;
                response.json::<T>().await
            }
        })
        .await
        .map_err(|e| self.wrap(url, e))
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("Fetch text from {}", url);
        let options = FetchOptions::default();

        retry(&self.retry, || {
            let options = &options;
            async move {
                let response = self.request(url, Method::GET, options).send().await?;
                response.text().await
            }
        })
        .await
        .map_err(|e| self.wrap(url, e))
    }

    pub async fn fetch_head(&self, url: &str) -> Result<(StatusCode, HeaderMap), FetchError> {
        let response = self.fetch(url, Method::HEAD, &FetchOptions::default()).await?;
        Ok((response.status(), response.headers().clone()))
    }
}
