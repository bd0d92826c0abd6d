//! Data models for outlets, extraction runs and their derived statistics.
//!
//! This module defines the core data structures used throughout the crate:
//! - [`Outlet`] / [`OutletConfig`]: a configured news source and the form used to create one
//! - [`ExtractionRun`] and [`RunStatus`]: one execution of the pipeline for one outlet
//! - [`OutletStatistics`]: running aggregate over all runs of an outlet
//! - [`SelectorAnalysisResult`]: output of the selector inference service
//! - [`LogEvent`]: a single live log line from an in-flight run
//! - [`ExtractedContent`] / [`ExtractedArticle`]: what the selector engine pulls out of a page
//!
//! Field names serialize as camelCase to match the operator-facing JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque outlet identifier.
pub type OutletId = String;

/// Opaque run identifier.
pub type RunId = String;

/// Smallest accepted frequency, in minutes.
pub const MIN_FREQUENCY_MINUTES: u32 = 1;
/// Largest accepted frequency (one day), in minutes.
pub const MAX_FREQUENCY_MINUTES: u32 = 1440;

/// Selector used on the listing page to find article links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSelectors {
    /// CSS selector matching article anchors (or containers holding one).
    pub article_links: String,
}

/// Selectors used on an article page.
///
/// `title_selector` and `content_selector` are required; the rest degrade
/// to `None` in the extracted output when absent or unmatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSelectors {
    pub title_selector: String,
    pub content_selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_selector: Option<String>,
}

/// Per-outlet cadences, in minutes.
///
/// Only `extraction` drives a timer in this crate; the other two are
/// validated and stored for the downstream generation and publishing jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frequencies {
    #[serde(rename = "extractionFrequency")]
    pub extraction: u32,
    #[serde(rename = "contentGenerationFrequency")]
    pub content_generation: u32,
    #[serde(rename = "publishingFrequency")]
    pub publishing: u32,
}

impl Default for Frequencies {
    fn default() -> Self {
        Self {
            extraction: 60,
            content_generation: 120,
            publishing: 240,
        }
    }
}

/// The form used to create an outlet, either by hand or seeded from inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutletConfig {
    pub name: String,
    pub base_url: String,
    pub listing_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_url: Option<String>,
    #[serde(default)]
    pub use_java_script: bool,
    pub listing_selectors: ListingSelectors,
    pub content_selectors: ContentSelectors,
    #[serde(flatten)]
    pub frequencies: Frequencies,
}

impl OutletConfig {
    /// Build a config from the selectors proposed by the inference service.
    pub fn from_analysis(
        name: impl Into<String>,
        base_url: impl Into<String>,
        listing_url: impl Into<String>,
        test_url: Option<String>,
        analysis: &SelectorAnalysisResult,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            listing_url: listing_url.into(),
            test_url,
            use_java_script: false,
            listing_selectors: ListingSelectors {
                article_links: analysis.listing_analysis.selector.clone(),
            },
            content_selectors: analysis.content_analysis.selectors.clone(),
            frequencies: Frequencies::default(),
        }
    }
}

/// A configured news source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outlet {
    pub id: OutletId,
    pub name: String,
    pub base_url: Url,
    pub listing_url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_url: Option<Url>,
    pub use_java_script: bool,
    pub listing_selectors: ListingSelectors,
    pub content_selectors: ContentSelectors,
    #[serde(flatten)]
    pub frequencies: Frequencies,
    /// `false` while paused or after deactivation.
    pub is_active: bool,
    #[serde(default)]
    pub last_extraction_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Set once on soft deletion. A deactivated outlet is never scheduled again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Row version for compare-and-swap updates.
    #[serde(default)]
    pub version: u64,
}

impl Outlet {
    pub fn is_deactivated(&self) -> bool {
        self.deactivated_at.is_some()
    }

    /// Whether the scheduler may start a run for this outlet.
    pub fn is_schedulable(&self) -> bool {
        self.is_active && !self.is_deactivated()
    }
}

/// Lifecycle of an [`ExtractionRun`]. Everything but `InProgress` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    /// Derive the terminal status of a run from its counters.
    ///
    /// This is the only place a terminal status is computed:
    /// - listing page could not be fetched: `Failed`
    /// - nothing new found, or nothing failed: `Completed`
    /// - every URL failed: `Failed`
    /// - otherwise: `Partial`
    pub fn derive(listing_fetched: bool, found: u32, failed: u32) -> Self {
        if !listing_fetched {
            RunStatus::Failed
        } else if failed == 0 {
            RunStatus::Completed
        } else if failed >= found {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of the extraction pipeline for one outlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRun {
    pub id: RunId,
    pub outlet_id: OutletId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_urls_found: u32,
    pub total_content_extracted: u32,
    pub total_failed: u32,
    /// Wall-clock duration in seconds, set when the run finishes.
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExtractionRun {
    /// A fresh `in_progress` run starting now.
    pub fn start(outlet_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            outlet_id: outlet_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::InProgress,
            total_urls_found: 0,
            total_content_extracted: 0,
            total_failed: 0,
            duration: 0.0,
            error_message: None,
        }
    }

    /// Close the run, deriving its status from the counters.
    pub fn finish(
        &mut self,
        listing_fetched: bool,
        found: u32,
        extracted: u32,
        failed: u32,
        error_message: Option<String>,
    ) {
        let finished_at = Utc::now();
        self.total_urls_found = found;
        self.total_content_extracted = extracted;
        self.total_failed = failed;
        self.status = RunStatus::derive(listing_fetched, found, failed);
        self.error_message = error_message;
        self.duration = (finished_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.finished_at = Some(finished_at);
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Aggregate counters over every finished run of one outlet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutletStatistics {
    pub total_runs: u64,
    pub total_urls_extracted: u64,
    pub total_content_extracted: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    #[serde(default)]
    pub last_run_status: Option<RunStatus>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl OutletStatistics {
    /// Fold one finished run into the aggregate.
    pub fn record(&mut self, run: &ExtractionRun) {
        self.total_runs += 1;
        self.total_urls_extracted += u64::from(run.total_urls_found);
        self.total_content_extracted += u64::from(run.total_content_extracted);
        self.total_failed += u64::from(run.total_failed);
        self.success_rate = if self.total_urls_extracted == 0 {
            0.0
        } else {
            self.total_content_extracted as f64 / self.total_urls_extracted as f64
        };
        self.last_run_status = Some(run.status);
        self.last_run_at = run.finished_at;
    }
}

/// Result of a listing-selector dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPreview {
    pub count: usize,
    pub urls_found: Vec<String>,
}

/// Structured fields pulled out of one article page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
}

/// A successfully extracted article, as handed to the content sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedArticle {
    #[serde(flatten)]
    pub content: ExtractedContent,
    pub source_url: String,
    pub outlet_id: OutletId,
    pub run_id: RunId,
    pub extracted_at: DateTime<Utc>,
}

/// Listing half of a [`SelectorAnalysisResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingAnalysis {
    pub selector: String,
    pub confidence: f64,
    pub count: usize,
    #[serde(default)]
    pub urls_found: Vec<String>,
}

/// Preview of what the proposed content selectors extract from the test page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPreview {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnalysis {
    pub selectors: ContentSelectors,
    pub extracted_preview: ContentPreview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResults {
    pub overall_confidence: f64,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Selectors proposed by the inference service, with confidence and preview.
///
/// Consumed once to seed an [`OutletConfig`], never stored on the outlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorAnalysisResult {
    pub listing_analysis: ListingAnalysis,
    pub content_analysis: ContentAnalysis,
    pub validation_results: ValidationResults,
    pub processing_time_ms: u64,
}

impl SelectorAnalysisResult {
    /// Force every confidence score into `[0, 1]`.
    pub fn clamp_confidences(mut self) -> Self {
        self.listing_analysis.confidence = clamp_unit(self.listing_analysis.confidence);
        self.validation_results.overall_confidence =
            clamp_unit(self.validation_results.overall_confidence);
        self
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

/// One live log line from an in-flight run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub outlet_id: OutletId,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        assert_eq!(RunStatus::derive(false, 0, 0), RunStatus::Failed);
        assert_eq!(RunStatus::derive(true, 0, 0), RunStatus::Completed);
        assert_eq!(RunStatus::derive(true, 10, 0), RunStatus::Completed);
        assert_eq!(RunStatus::derive(true, 10, 3), RunStatus::Partial);
        assert_eq!(RunStatus::derive(true, 10, 10), RunStatus::Failed);
        assert_eq!(RunStatus::derive(true, 1, 1), RunStatus::Failed);
    }

    #[test]
    fn test_finish_sets_counters_and_duration() {
        let mut run = ExtractionRun::start("outlet-1");
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(!run.is_finished());

        run.finish(true, 10, 7, 3, None);
        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(run.total_urls_found, 10);
        assert_eq!(run.total_content_extracted, 7);
        assert_eq!(run.total_failed, 3);
        assert!(run.duration >= 0.0);
        assert!(run.is_finished());
    }

    #[test]
    fn test_statistics_success_rate() {
        let mut stats = OutletStatistics::default();
        assert_eq!(stats.success_rate, 0.0);

        let mut run = ExtractionRun::start("o");
        run.finish(true, 0, 0, 0, None);
        stats.record(&run);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.total_runs, 1);

        let mut run = ExtractionRun::start("o");
        run.finish(true, 4, 3, 1, None);
        stats.record(&run);
        assert_eq!(stats.total_urls_extracted, 4);
        assert_eq!(stats.total_content_extracted, 3);
        assert_eq!(stats.total_failed, 1);
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.last_run_status, Some(RunStatus::Partial));
    }

    #[test]
    fn test_outlet_config_yaml_uses_flat_frequencies() {
        let yaml = r#"
name: Example Times
baseUrl: https://example.com
listingUrl: https://example.com/news
listingSelectors:
  articleLinks: a.article
contentSelectors:
  titleSelector: h1
  contentSelector: div.body p
extractionFrequency: 30
contentGenerationFrequency: 60
publishingFrequency: 90
"#;
        let cfg: OutletConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.frequencies.extraction, 30);
        assert_eq!(cfg.frequencies.publishing, 90);
        assert!(!cfg.use_java_script);
        assert_eq!(cfg.content_selectors.image_selector, None);
    }

    #[test]
    fn test_run_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_clamp_confidences() {
        let result = SelectorAnalysisResult {
            listing_analysis: ListingAnalysis {
                selector: "a".into(),
                confidence: 1.7,
                count: 0,
                urls_found: vec![],
            },
            content_analysis: ContentAnalysis {
                selectors: ContentSelectors {
                    title_selector: "h1".into(),
                    content_selector: "p".into(),
                    image_selector: None,
                    date_selector: None,
                    author_selector: None,
                    category_selector: None,
                },
                extracted_preview: ContentPreview {
                    title: "t".into(),
                    content: "c".into(),
                    author: None,
                    date: None,
                },
            },
            validation_results: ValidationResults {
                overall_confidence: -0.2,
                messages: vec![],
            },
            processing_time_ms: 5,
        }
        .clamp_confidences();
        assert_eq!(result.listing_analysis.confidence, 1.0);
        assert_eq!(result.validation_results.overall_confidence, 0.0);
    }
}
