//! Test doubles for the external collaborators.

use crate::error::{FetchError, InferenceUnavailableError};
use crate::fetch::{FetchOptions, Fetcher, Page};
use crate::inference::{InferenceRequest, SelectorInference};
use crate::models::{
    ContentAnalysis, ContentPreview, ContentSelectors, ExtractedArticle, Frequencies,
    ListingAnalysis, ListingSelectors, Outlet, OutletConfig, SelectorAnalysisResult,
    ValidationResults,
};
use crate::sink::ContentSink;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

pub(crate) const BASE: &str = "https://news.example.com";

pub(crate) fn sample_config(name: &str) -> OutletConfig {
    OutletConfig {
        name: name.to_string(),
        base_url: BASE.to_string(),
        listing_url: format!("{BASE}/latest"),
        test_url: Some(format!("{BASE}/story/0")),
        use_java_script: false,
        listing_selectors: ListingSelectors {
            article_links: "a.article".into(),
        },
        content_selectors: ContentSelectors {
            title_selector: "h1".into(),
            content_selector: "div.body p".into(),
            image_selector: None,
            date_selector: Some("time".into()),
            author_selector: None,
            category_selector: None,
        },
        frequencies: Frequencies::default(),
    }
}

pub(crate) fn sample_outlet(id: &str) -> Outlet {
    let config = sample_config(id);
    Outlet {
        id: id.to_string(),
        name: config.name,
        base_url: Url::parse(&config.base_url).unwrap(),
        listing_url: Url::parse(&config.listing_url).unwrap(),
        test_url: None,
        use_java_script: false,
        listing_selectors: config.listing_selectors,
        content_selectors: config.content_selectors,
        frequencies: config.frequencies,
        is_active: true,
        last_extraction_run: None,
        created_at: Utc::now(),
        deactivated_at: None,
        version: 0,
    }
}

pub(crate) fn sample_analysis() -> SelectorAnalysisResult {
    SelectorAnalysisResult {
        listing_analysis: ListingAnalysis {
            selector: "a.article".into(),
            confidence: 0.92,
            count: 2,
            urls_found: vec![format!("{BASE}/story/1"), format!("{BASE}/story/2")],
        },
        content_analysis: ContentAnalysis {
            selectors: ContentSelectors {
                title_selector: "h1".into(),
                content_selector: "div.body p".into(),
                image_selector: None,
                date_selector: None,
                author_selector: None,
                category_selector: None,
            },
            extracted_preview: ContentPreview {
                title: "Story 1".into(),
                content: "Body".into(),
                author: None,
                date: None,
            },
        },
        validation_results: ValidationResults {
            overall_confidence: 0.88,
            messages: vec!["listing selector matched 2 links".into()],
        },
        processing_time_ms: 1200,
    }
}

/// Listing page linking to `/story/{i}` for every `i` in `ids`.
pub(crate) fn listing_html(ids: impl IntoIterator<Item = usize>) -> String {
    let links: String = ids
        .into_iter()
        .map(|i| format!(r#"<li><a class="article" href="/story/{i}">Story {i}</a></li>"#))
        .collect();
    format!("<html><body><ul>{links}</ul></body></html>")
}

/// Article page; without a body it fails content extraction.
pub(crate) fn article_html(i: usize, with_body: bool) -> String {
    let body = if with_body {
        format!(r#"<div class="body"><p>Paragraph for story {i}.</p></div>"#)
    } else {
        r#"<div class="sidebar"><p>Related</p></div>"#.to_string()
    };
    format!(r#"<html><body><h1>Story {i}</h1><time>2025-05-06</time>{body}</body></html>"#)
}

pub(crate) fn story_url(i: usize) -> String {
    format!("{BASE}/story/{i}")
}

/// Fetcher serving canned responses, with an optional gate and delay.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    pages: Mutex<HashMap<String, Result<String, FetchError>>>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    requests: Mutex<Vec<(String, FetchOptions)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch waits `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every fetch waits for a permit; `add_permits(1)` opens the gate.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn page(&self, url: impl Into<String>, html: impl Into<String>) {
        self.pages.lock().insert(url.into(), Ok(html.into()));
    }

    pub fn fail(&self, url: impl Into<String>, status: u16) {
        let url = url.into();
        self.pages.lock().insert(
            url.clone(),
            Err(FetchError::Status { url, status }),
        );
    }

    /// Listing with `found` stories, the first `valid` of which have a body.
    pub fn scenario(&self, listing: &str, found: usize, valid: usize) {
        self.page(listing, listing_html(0..found));
        for i in 0..found {
            self.page(story_url(i), article_html(i, i < valid));
        }
    }

    /// Every fetched URL with the options it was fetched with, in call order.
    pub fn requests(&self) -> Vec<(String, FetchOptions)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url, options: FetchOptions) -> Result<Page, FetchError> {
        self.requests.lock().push((url.to_string(), options));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let response = self.pages.lock().get(url.as_str()).cloned();
        match response {
            Some(Ok(html)) => Ok(Page {
                url: url.clone(),
                html,
            }),
            Some(Err(e)) => Err(e),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// Sink that keeps articles in memory and can be told to reject some URLs.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub articles: Mutex<Vec<ExtractedArticle>>,
    reject: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn reject(&self, url: impl Into<String>) {
        self.reject.lock().insert(url.into());
    }
}

#[async_trait]
impl ContentSink for RecordingSink {
    async fn store(&self, article: &ExtractedArticle) -> std::io::Result<()> {
        if self.reject.lock().contains(&article.source_url) {
            return Err(std::io::Error::other("disk full"));
        }
        self.articles.lock().push(article.clone());
        Ok(())
    }
}

/// Inference backend that is slow or fails a set number of times.
pub(crate) struct ScriptedInference {
    delay: Duration,
    failures: usize,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedInference {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            failures: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_then_ok(failures: usize) -> Self {
        Self {
            delay: Duration::ZERO,
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl SelectorInference for ScriptedInference {
    async fn infer(
        &self,
        _request: &InferenceRequest,
    ) -> Result<SelectorAnalysisResult, InferenceUnavailableError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.failures {
            return Err(InferenceUnavailableError::new("model overloaded"));
        }
        Ok(sample_analysis())
    }
}
