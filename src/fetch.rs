//! HTML fetch collaborator.
//!
//! The run manager only depends on the [`Fetcher`] trait. [`HttpFetcher`]
//! is the production implementation backed by a shared `reqwest` client.

use crate::error::FetchError;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Per-request hints passed through to the fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// The page needs JavaScript rendering to show its content.
    pub use_javascript: bool,
}

/// A fetched HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Final URL after redirects; relative links resolve against it.
    pub url: Url,
    pub html: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, options: FetchOptions) -> Result<Page, FetchError>;
}

/// Fetch with a hard upper bound, whatever the fetcher's own timeout policy.
pub async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    url: &Url,
    options: FetchOptions,
    timeout: Duration,
) -> Result<Page, FetchError> {
    match tokio::time::timeout(timeout, fetcher.fetch(url, options)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            after: timeout,
        }),
    }
}

/// `reqwest`-backed fetcher with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url, js = options.use_javascript))]
    async fn fetch(&self, url: &Url, options: FetchOptions) -> Result<Page, FetchError> {
        if options.use_javascript {
            debug!("JavaScript rendering requested; fetching static HTML");
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Non-success status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let html = response.text().await.map_err(|e| self.classify(url, e))?;
        debug!(
            bytes = html.len(),
            preview = %truncate_for_log(&html, 120),
            "Fetched page"
        );
        Ok(Page {
            url: final_url,
            html,
        })
    }
}

impl HttpFetcher {
    fn classify(&self, url: &Url, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}
