//! Operator-facing surface.
//!
//! [`ExtractionService`] is the one object the binary (or an embedding API
//! layer) talks to. It owns the scheduler and keeps it in step with registry
//! changes: creating an outlet arms its timer, a frequency change re-arms it,
//! resuming restarts the countdown, deactivation disarms it.

use crate::broadcast::{Broadcaster, RunLogStream};
use crate::config::AppConfig;
use crate::error::{Error, FetchError, Result};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::inference::{
    HttpSelectorInference, InferenceAdapter, InferenceRequest, RetryInference,
};
use crate::models::{
    ContentSelectors, ExtractedContent, ExtractionRun, Frequencies, ListingPreview, Outlet,
    OutletConfig, OutletStatistics, SelectorAnalysisResult,
};
use crate::registry::OutletRegistry;
use crate::runner::{RunHandle, RunLimits, RunManager};
use crate::scheduler::Scheduler;
use crate::sink::{ContentSink, JsonDirSink};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// External collaborators the service is built from.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<dyn Fetcher>,
    pub sink: Arc<dyn ContentSink>,
    pub inference: InferenceAdapter,
}

pub struct ExtractionService {
    store: Arc<dyn Store>,
    registry: OutletRegistry,
    runner: Arc<RunManager>,
    scheduler: Scheduler,
    broadcaster: Broadcaster,
    inference: InferenceAdapter,
}

impl ExtractionService {
    pub fn new(collaborators: Collaborators, limits: RunLimits, broadcast_capacity: usize) -> Self {
        let Collaborators {
            store,
            fetcher,
            sink,
            inference,
        } = collaborators;
        let broadcaster = Broadcaster::new(broadcast_capacity);
        let runner = Arc::new(RunManager::new(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            sink,
            broadcaster.clone(),
            limits,
        ));
        Self {
            registry: OutletRegistry::new(Arc::clone(&store), fetcher, limits.fetch_timeout),
            scheduler: Scheduler::new(Arc::clone(&runner)),
            store,
            runner,
            broadcaster,
            inference,
        }
    }

    /// Wire the HTTP fetcher, JSON sink and (optional) HTTP inference from config.
    pub fn from_config(config: &AppConfig, store: Arc<dyn Store>) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(config.fetch_timeout(), &config.fetch.user_agent)?;
        let inference = match &config.inference {
            Some(settings) => {
                let backend = RetryInference::new(
                    HttpSelectorInference::new(settings.endpoint.clone(), settings.api_key.clone()),
                    settings.max_retries,
                    Duration::from_millis(500),
                );
                InferenceAdapter::new(Arc::new(backend), Duration::from_secs(settings.timeout_secs))
            }
            None => InferenceAdapter::disabled(),
        };
        let collaborators = Collaborators {
            store,
            fetcher: Arc::new(fetcher),
            sink: Arc::new(JsonDirSink::new(config.sink.output_dir.clone())),
            inference,
        };
        Ok(Self::new(
            collaborators,
            config.run_limits(),
            config.broadcast.capacity,
        ))
    }

    /// Create the given outlets when the store holds none yet.
    pub async fn seed(&self, outlets: &[OutletConfig]) -> Result<usize> {
        if !self.registry.list().await?.is_empty() {
            return Ok(0);
        }
        for config in outlets {
            self.registry.create(config.clone()).await?;
        }
        if !outlets.is_empty() {
            info!(count = outlets.len(), "Seeded outlets from configuration");
        }
        Ok(outlets.len())
    }

    /// Arm a timer for every stored outlet that can still run.
    ///
    /// First fires land one interval from now; downtime is never caught up.
    pub async fn start(&self) -> Result<usize> {
        let outlets = self.registry.list().await?;
        let armed = self.scheduler.arm_all(&outlets);
        info!(armed, total = outlets.len(), "Scheduler started");
        Ok(armed)
    }

    /// Disarm every timer. Runs in flight finish on their own.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub async fn create_outlet(&self, config: OutletConfig) -> Result<Outlet> {
        let outlet = self.registry.create(config).await?;
        self.scheduler.arm(&outlet);
        Ok(outlet)
    }

    pub async fn create_outlet_from_analysis(
        &self,
        name: &str,
        base_url: &str,
        listing_url: &str,
        test_url: Option<&str>,
        analysis: &SelectorAnalysisResult,
    ) -> Result<Outlet> {
        let outlet = self
            .registry
            .create_from_analysis(name, base_url, listing_url, test_url, analysis)
            .await?;
        self.scheduler.arm(&outlet);
        Ok(outlet)
    }

    pub async fn get_outlet(&self, id: &str) -> Result<Outlet> {
        self.registry.get(id).await
    }

    pub async fn list_outlets(&self) -> Result<Vec<Outlet>> {
        self.registry.list().await
    }

    pub async fn find_outlet(&self, name_or_id: &str) -> Result<Outlet> {
        self.registry.find(name_or_id).await
    }

    pub async fn update_frequencies(&self, id: &str, frequencies: Frequencies) -> Result<Outlet> {
        let outlet = self.registry.update_frequencies(id, frequencies).await?;
        self.scheduler.rearm(&outlet.id, outlet.frequencies.extraction);
        Ok(outlet)
    }

    /// The timer stays armed; its ticks are skipped while the outlet is paused.
    pub async fn pause(&self, id: &str) -> Result<Outlet> {
        self.registry.pause(id).await
    }

    pub async fn resume(&self, id: &str) -> Result<Outlet> {
        let outlet = self.registry.resume(id).await?;
        self.scheduler.restart(&outlet);
        Ok(outlet)
    }

    pub async fn deactivate(&self, id: &str) -> Result<Outlet> {
        let outlet = self.registry.deactivate(id).await?;
        self.scheduler.disarm(&outlet.id);
        Ok(outlet)
    }

    /// Manual fire. Shares the one-run-per-outlet guard with the scheduler.
    #[instrument(level = "info", skip(self))]
    pub async fn trigger_extraction(&self, id: &str) -> Result<RunHandle> {
        self.runner.start(id).await
    }

    pub async fn test_listing_selectors(
        &self,
        listing_url: &str,
        selector: &str,
        base_url: Option<&str>,
        use_javascript: bool,
    ) -> Result<ListingPreview> {
        self.registry
            .test_listing_selectors(listing_url, selector, base_url, use_javascript)
            .await
    }

    pub async fn test_content_selectors(
        &self,
        test_url: &str,
        selectors: &ContentSelectors,
        use_javascript: bool,
    ) -> Result<ExtractedContent> {
        self.registry
            .test_content_selectors(test_url, selectors, use_javascript)
            .await
    }

    pub async fn get_statistics(&self, id: &str) -> Result<OutletStatistics> {
        self.store.statistics(id).await.map_err(Error::from_store)
    }

    /// Most recent runs first.
    pub async fn get_history(&self, id: &str, limit: usize) -> Result<Vec<ExtractionRun>> {
        self.store.history(id, limit).await.map_err(Error::from_store)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<ExtractionRun> {
        Ok(self.store.get_run(run_id).await?)
    }

    pub fn subscribe_to_run_logs(&self, run_id: &str) -> RunLogStream {
        self.broadcaster.subscribe(run_id)
    }

    /// Ask the inference service for selectors. Never retried beyond what the
    /// adapter does internally; on failure the operator configures by hand.
    pub async fn infer_selectors(&self, request: &InferenceRequest) -> Result<SelectorAnalysisResult> {
        self.inference.infer(request).await.map_err(|e| {
            warn!(name = %request.name, reason = %e.reason, "Falling back to manual selector configuration");
            Error::from(e)
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
