//! Outlet registry: validated creation, frequency changes, pause/resume and
//! selector dry runs.
//!
//! Validation happens once, here. Anything that reaches the store has
//! parseable URLs, compilable selectors and frequencies in `[1, 1440]`, so
//! the run manager never re-checks configuration.
//!
//! Writes go through [`modify_outlet`], the optimistic-locking helper the
//! run manager also uses, so a pause racing a run completion never loses
//! either change.

use crate::error::{Error, Result, ValidationError};
use crate::fetch::{FetchOptions, Fetcher, fetch_with_timeout};
use crate::models::{
    ContentSelectors, ExtractedContent, Frequencies, ListingPreview, ListingSelectors,
    MAX_FREQUENCY_MINUTES, MIN_FREQUENCY_MINUTES, Outlet, OutletConfig, SelectorAnalysisResult,
};
use crate::selectors::{self, CompiledContentSelectors};
use crate::store::{Store, modify_outlet};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

/// Check every frequency is within `[1, 1440]` minutes.
pub fn validate_frequencies(frequencies: &Frequencies) -> Result<(), ValidationError> {
    for (field, value) in [
        ("extractionFrequency", frequencies.extraction),
        ("contentGenerationFrequency", frequencies.content_generation),
        ("publishingFrequency", frequencies.publishing),
    ] {
        if !(MIN_FREQUENCY_MINUTES..=MAX_FREQUENCY_MINUTES).contains(&value) {
            return Err(ValidationError::FrequencyOutOfRange { field, value });
        }
    }
    Ok(())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ValidationError> {
    let invalid = || ValidationError::InvalidUrl {
        field,
        value: value.to_string(),
    };
    let url = Url::parse(value.trim()).map_err(|_| invalid())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(invalid()),
    }
}

/// A config that passed validation, with its URLs parsed.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub config: OutletConfig,
    pub base_url: Url,
    pub listing_url: Url,
    pub test_url: Option<Url>,
}

/// Validate an outlet config without persisting anything.
pub fn validate(config: OutletConfig) -> Result<ValidatedConfig, ValidationError> {
    if config.name.trim().is_empty() {
        return Err(ValidationError::Empty { field: "name" });
    }
    let base_url = parse_url("baseUrl", &config.base_url)?;
    let listing_url = parse_url("listingUrl", &config.listing_url)?;
    let test_url = config
        .test_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .map(|u| parse_url("testUrl", u))
        .transpose()?;
    selectors::compile_listing(&config.listing_selectors)?;
    CompiledContentSelectors::compile(&config.content_selectors)?;
    validate_frequencies(&config.frequencies)?;
    Ok(ValidatedConfig {
        config,
        base_url,
        listing_url,
        test_url,
    })
}

pub struct OutletRegistry {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn Fetcher>,
    fetch_timeout: Duration,
}

impl OutletRegistry {
    pub fn new(store: Arc<dyn Store>, fetcher: Arc<dyn Fetcher>, fetch_timeout: Duration) -> Self {
        Self {
            store,
            fetcher,
            fetch_timeout,
        }
    }

    /// Validate and persist a new outlet. New outlets start active.
    #[instrument(level = "info", skip_all, fields(name = %config.name))]
    pub async fn create(&self, config: OutletConfig) -> Result<Outlet> {
        let valid = validate(config)?;
        let ValidatedConfig {
            config,
            base_url,
            listing_url,
            test_url,
        } = valid;

        let outlet = Outlet {
            id: uuid::Uuid::new_v4().to_string(),
            name: config.name.trim().to_string(),
            base_url,
            listing_url,
            test_url,
            use_java_script: config.use_java_script,
            listing_selectors: ListingSelectors {
                article_links: config.listing_selectors.article_links.trim().to_string(),
            },
            content_selectors: config.content_selectors,
            frequencies: config.frequencies,
            is_active: true,
            last_extraction_run: None,
            created_at: Utc::now(),
            deactivated_at: None,
            version: 0,
        };
        let outlet = self.store.insert_outlet(outlet).await?;
        info!(outlet_id = %outlet.id, "Created outlet");
        Ok(outlet)
    }

    /// Create an outlet whose selectors come from an inference result.
    pub async fn create_from_analysis(
        &self,
        name: &str,
        base_url: &str,
        listing_url: &str,
        test_url: Option<&str>,
        analysis: &SelectorAnalysisResult,
    ) -> Result<Outlet> {
        let config = OutletConfig::from_analysis(
            name,
            base_url,
            listing_url,
            test_url.map(str::to_string),
            analysis,
        );
        self.create(config).await
    }

    pub async fn get(&self, id: &str) -> Result<Outlet> {
        self.store.get_outlet(id).await.map_err(Error::from_store)
    }

    pub async fn list(&self) -> Result<Vec<Outlet>> {
        Ok(self.store.list_outlets().await?)
    }

    /// Look an outlet up by id, falling back to an exact name match.
    pub async fn find(&self, name_or_id: &str) -> Result<Outlet> {
        if let Ok(outlet) = self.store.get_outlet(name_or_id).await {
            return Ok(outlet);
        }
        self.list()
            .await?
            .into_iter()
            .find(|o| o.name == name_or_id)
            .ok_or_else(|| Error::OutletNotFound(name_or_id.to_string()))
    }

    /// Replace all three frequencies. The scheduler picks the new extraction
    /// interval up on its next re-arm; a run already in flight is untouched.
    #[instrument(level = "info", skip_all, fields(outlet_id = %id))]
    pub async fn update_frequencies(&self, id: &str, frequencies: Frequencies) -> Result<Outlet> {
        validate_frequencies(&frequencies)?;
        let outlet = modify_outlet(self.store.as_ref(), id, |o| o.frequencies = frequencies)
            .await
            .map_err(Error::from_store)?;
        info!(
            extraction = frequencies.extraction,
            content_generation = frequencies.content_generation,
            publishing = frequencies.publishing,
            "Updated frequencies"
        );
        Ok(outlet)
    }

    /// Stop future fires. A run already in flight finishes normally.
    #[instrument(level = "info", skip_all, fields(outlet_id = %id))]
    pub async fn pause(&self, id: &str) -> Result<Outlet> {
        self.ensure_not_deactivated(id).await?;
        let outlet = modify_outlet(self.store.as_ref(), id, |o| o.is_active = false)
            .await
            .map_err(Error::from_store)?;
        info!("Paused outlet");
        Ok(outlet)
    }

    #[instrument(level = "info", skip_all, fields(outlet_id = %id))]
    pub async fn resume(&self, id: &str) -> Result<Outlet> {
        self.ensure_not_deactivated(id).await?;
        let outlet = modify_outlet(self.store.as_ref(), id, |o| o.is_active = true)
            .await
            .map_err(Error::from_store)?;
        info!("Resumed outlet");
        Ok(outlet)
    }

    /// Soft delete: the row and its history stay, the outlet never runs again.
    #[instrument(level = "info", skip_all, fields(outlet_id = %id))]
    pub async fn deactivate(&self, id: &str) -> Result<Outlet> {
        let now = Utc::now();
        let outlet = modify_outlet(self.store.as_ref(), id, move |o| {
            o.is_active = false;
            o.deactivated_at.get_or_insert(now);
        })
        .await
        .map_err(Error::from_store)?;
        info!("Deactivated outlet");
        Ok(outlet)
    }

    async fn ensure_not_deactivated(&self, id: &str) -> Result<()> {
        if self.get(id).await?.is_deactivated() {
            return Err(Error::OutletDeactivated(id.to_string()));
        }
        Ok(())
    }

    /// Dry run of a listing selector. Touches neither outlets nor history.
    ///
    /// Relative links resolve against `base_url` when given, otherwise
    /// against the fetched page's own URL.
    #[instrument(level = "info", skip_all, fields(%listing_url, %selector))]
    pub async fn test_listing_selectors(
        &self,
        listing_url: &str,
        selector: &str,
        base_url: Option<&str>,
        use_javascript: bool,
    ) -> Result<ListingPreview> {
        let listing = parse_url("listingUrl", listing_url)?;
        let base = base_url.map(|b| parse_url("baseUrl", b)).transpose()?;
        let compiled = selectors::compile_listing(&ListingSelectors {
            article_links: selector.to_string(),
        })?;

        let page = fetch_with_timeout(
            self.fetcher.as_ref(),
            &listing,
            FetchOptions { use_javascript },
            self.fetch_timeout,
        )
        .await?;
        let urls_found =
            selectors::extract_links(&page.html, &compiled, base.as_ref().unwrap_or(&page.url));
        info!(count = urls_found.len(), "Listing selector dry run");
        Ok(ListingPreview {
            count: urls_found.len(),
            urls_found,
        })
    }

    /// Dry run of content selectors against one article page.
    #[instrument(level = "info", skip_all, fields(%test_url))]
    pub async fn test_content_selectors(
        &self,
        test_url: &str,
        content_selectors: &ContentSelectors,
        use_javascript: bool,
    ) -> Result<ExtractedContent> {
        let url = parse_url("testUrl", test_url)?;
        let compiled = CompiledContentSelectors::compile(content_selectors)?;
        let page = fetch_with_timeout(
            self.fetcher.as_ref(),
            &url,
            FetchOptions { use_javascript },
            self.fetch_timeout,
        )
        .await?;
        let content = selectors::extract_content(&page.html, &compiled, &page.url)?;
        info!(title = %content.title, "Content selector dry run");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreState};
    use crate::testing::{ScriptedFetcher, article_html, listing_html, sample_analysis, sample_config, story_url, BASE};

    fn registry() -> (OutletRegistry, Arc<MemoryStore>, Arc<ScriptedFetcher>) {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        let registry = OutletRegistry::new(store.clone(), fetcher.clone(), Duration::from_secs(5));
        (registry, store, fetcher)
    }

    fn state_json(state: &StoreState) -> String {
        serde_json::to_string(state).unwrap()
    }

    #[tokio::test]
    async fn test_create_sets_active_and_persists() {
        let (registry, store, _) = registry();
        let outlet = registry.create(sample_config("Daily")).await.unwrap();
        assert!(outlet.is_active);
        assert_eq!(outlet.last_extraction_run, None);
        assert_eq!(store.get_outlet(&outlet.id).await.unwrap(), outlet);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_config() {
        let (registry, store, _) = registry();

        let mut no_title = sample_config("x");
        no_title.content_selectors.title_selector = " ".into();
        assert!(matches!(
            registry.create(no_title).await,
            Err(Error::Validation(ValidationError::Empty { field: "contentSelectors.titleSelector" }))
        ));

        let mut no_listing = sample_config("x");
        no_listing.listing_selectors.article_links = String::new();
        assert!(matches!(
            registry.create(no_listing).await,
            Err(Error::Validation(ValidationError::Empty { .. }))
        ));

        let mut too_often = sample_config("x");
        too_often.frequencies.publishing = 1441;
        assert!(matches!(
            registry.create(too_often).await,
            Err(Error::Validation(ValidationError::FrequencyOutOfRange { field: "publishingFrequency", value: 1441 }))
        ));

        let mut bad_url = sample_config("x");
        bad_url.listing_url = "ftp://example.com/".into();
        assert!(matches!(
            registry.create(bad_url).await,
            Err(Error::Validation(ValidationError::InvalidUrl { .. }))
        ));

        assert!(store.list_outlets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_frequencies_validates_each_value() {
        let (registry, _, _) = registry();
        let outlet = registry.create(sample_config("Daily")).await.unwrap();

        let err = registry
            .update_frequencies(
                &outlet.id,
                Frequencies {
                    extraction: 0,
                    content_generation: 60,
                    publishing: 60,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let updated = registry
            .update_frequencies(
                &outlet.id,
                Frequencies {
                    extraction: 30,
                    content_generation: 60,
                    publishing: 1440,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.frequencies.extraction, 30);
        assert_eq!(updated.version, outlet.version + 1);
    }

    #[tokio::test]
    async fn test_pause_resume_and_deactivate() {
        let (registry, _, _) = registry();
        let outlet = registry.create(sample_config("Daily")).await.unwrap();

        assert!(!registry.pause(&outlet.id).await.unwrap().is_active);
        assert!(registry.resume(&outlet.id).await.unwrap().is_active);

        let gone = registry.deactivate(&outlet.id).await.unwrap();
        assert!(gone.is_deactivated());
        assert!(!gone.is_schedulable());
        assert!(matches!(
            registry.resume(&outlet.id).await,
            Err(Error::OutletDeactivated(_))
        ));
        // Still readable; nothing is hard-deleted.
        assert!(registry.get(&outlet.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_outlet() {
        let (registry, _, _) = registry();
        assert!(matches!(
            registry.pause("nope").await,
            Err(Error::OutletNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_name_or_id() {
        let (registry, _, _) = registry();
        let outlet = registry.create(sample_config("Daily")).await.unwrap();
        assert_eq!(registry.find("Daily").await.unwrap().id, outlet.id);
        assert_eq!(registry.find(&outlet.id).await.unwrap().id, outlet.id);
        assert!(registry.find("Weekly").await.is_err());
    }

    #[tokio::test]
    async fn test_create_from_analysis_seeds_selectors() {
        let (registry, _, _) = registry();
        let outlet = registry
            .create_from_analysis("Seeded", BASE, &format!("{BASE}/latest"), None, &sample_analysis())
            .await
            .unwrap();
        assert_eq!(outlet.listing_selectors.article_links, "a.article");
        assert_eq!(outlet.content_selectors.title_selector, "h1");
    }

    #[tokio::test]
    async fn test_dry_runs_have_no_side_effects() {
        let (registry, store, fetcher) = registry();
        registry.create(sample_config("Daily")).await.unwrap();
        fetcher.page(format!("{BASE}/latest"), listing_html([1, 2, 2, 3]));
        fetcher.page(story_url(1), article_html(1, true));
        let before = state_json(&store.snapshot());

        let preview = registry
            .test_listing_selectors(&format!("{BASE}/latest"), "a.article", None, false)
            .await
            .unwrap();
        assert_eq!(preview.count, 3);
        assert_eq!(preview.urls_found[0], story_url(1));

        let content = registry
            .test_content_selectors(&story_url(1), &sample_config("x").content_selectors, false)
            .await
            .unwrap();
        assert_eq!(content.title, "Story 1");
        assert_eq!(content.date.as_deref(), Some("2025-05-06"));

        assert_eq!(state_json(&store.snapshot()), before);
    }

    #[tokio::test]
    async fn test_content_dry_run_reports_mismatch() {
        let (registry, _, fetcher) = registry();
        fetcher.page(story_url(9), article_html(9, false));
        let err = registry
            .test_content_selectors(&story_url(9), &sample_config("x").content_selectors, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SelectorMismatch(_)));
    }
}
