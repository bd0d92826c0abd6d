//! Selector inference adapter.
//!
//! Wraps an AI analysis service that proposes selectors for a new outlet.
//! The rest of the crate only sees [`InferenceAdapter::infer`]: one method,
//! one timeout, one error type ([`InferenceUnavailableError`]). Whatever
//! retrying the backend needs happens behind that boundary.
//!
//! # Architecture
//!
//! - [`SelectorInference`]: core trait for a backend
//! - [`HttpSelectorInference`]: POSTs the request as JSON to a configured endpoint
//! - [`RetryInference`]: decorator adding exponential backoff with jitter
//! - [`InferenceAdapter`]: the timeout boundary used by the service
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::error::InferenceUnavailableError;
use crate::models::SelectorAnalysisResult;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// What the inference service is asked to analyse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub name: String,
    pub base_url: String,
    pub listing_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_url: Option<String>,
}

/// A backend able to propose selectors.
#[async_trait]
pub trait SelectorInference: Send + Sync {
    async fn infer(
        &self,
        request: &InferenceRequest,
    ) -> Result<SelectorAnalysisResult, InferenceUnavailableError>;
}

/// Calls a JSON-over-HTTP analysis endpoint.
#[derive(Debug, Clone)]
pub struct HttpSelectorInference {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSelectorInference {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl SelectorInference for HttpSelectorInference {
    #[instrument(level = "info", skip_all, fields(endpoint = %self.endpoint, name = %request.name))]
    async fn infer(
        &self,
        request: &InferenceRequest,
    ) -> Result<SelectorAnalysisResult, InferenceUnavailableError> {
        let mut call = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|e| InferenceUnavailableError::new(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InferenceUnavailableError::new(e.to_string()))?;
        if !status.is_success() {
            return Err(InferenceUnavailableError::new(format!(
                "service returned HTTP {}: {}",
                status.as_u16(),
                truncate_for_log(&body, 200)
            )));
        }

        serde_json::from_str::<SelectorAnalysisResult>(&body).map_err(|e| {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(&body, 300),
                "Service returned non-conforming JSON"
            );
            InferenceUnavailableError::new(format!("malformed analysis: {e}"))
        })
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`SelectorInference`].
pub struct RetryInference<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryInference<T>
where
    T: SelectorInference,
{
    /// * `max_retries` - retries after the first attempt
    /// * `base_delay` - delay before the first retry, doubled each time
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryInference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryInference")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<T> SelectorInference for RetryInference<T>
where
    T: SelectorInference,
{
    #[instrument(level = "info", skip_all)]
    async fn infer(
        &self,
        request: &InferenceRequest,
    ) -> Result<SelectorAnalysisResult, InferenceUnavailableError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.infer(request).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "infer() exhausted retries"
                        );
                        return Err(e);
                    }

                    let mut delay = self
                        .base_delay
                        .saturating_mul(1u32 << (attempt - 1).min(16));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "infer() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// The inference boundary used by the rest of the crate.
#[derive(Clone)]
pub struct InferenceAdapter {
    backend: Option<Arc<dyn SelectorInference>>,
    timeout: Duration,
}

impl InferenceAdapter {
    pub fn new(backend: Arc<dyn SelectorInference>, timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            timeout,
        }
    }

    /// An adapter with no backend; every call reports unavailability.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            timeout: Duration::ZERO,
        }
    }

    /// Ask the backend for selectors, bounded by the configured timeout.
    #[instrument(level = "info", skip_all, fields(name = %request.name))]
    pub async fn infer(
        &self,
        request: &InferenceRequest,
    ) -> Result<SelectorAnalysisResult, InferenceUnavailableError> {
        let Some(backend) = &self.backend else {
            return Err(InferenceUnavailableError::new(
                "no inference service configured",
            ));
        };

        let t0 = Instant::now();
        let result = match tokio::time::timeout(self.timeout, backend.infer(request)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceUnavailableError::new(format!(
                "timed out after {:?}",
                self.timeout
            ))),
        };
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        match result {
            Ok(analysis) => {
                let analysis = analysis.clamp_confidences();
                info!(
                    elapsed_ms,
                    confidence = analysis.validation_results.overall_confidence,
                    "Selector inference succeeded"
                );
                Ok(analysis)
            }
            Err(e) => {
                warn!(elapsed_ms, error = %e, "Selector inference unavailable; manual configuration required");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for InferenceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceAdapter")
            .field("enabled", &self.backend.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
