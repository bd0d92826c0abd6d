//! Extraction run manager.
//!
//! Executes one end-to-end run for one outlet:
//!
//! 1. Claim the outlet's in-flight slot and append an `in_progress` run
//! 2. Fetch the listing page and extract candidate links
//! 3. Drop links already extracted for this outlet
//! 4. Fetch and extract every new link with bounded concurrency, recording
//!    each URL's outcome without letting one failure abort its siblings
//! 5. Close the run with a status derived from its counters, update
//!    statistics and `lastExtractionRun`
//!
//! Manual and scheduled triggers both enter through [`RunManager::start`],
//! so the one-run-per-outlet guard covers both. The guard and the run's log
//! channel are RAII handles released on every exit path, panics included.
//! A panic inside one URL's extraction fails only that URL.

use crate::broadcast::{Broadcaster, RunChannel};
use crate::error::{Error, Result};
use crate::fetch::{FetchOptions, Fetcher, Page, fetch_with_timeout};
use crate::models::{ExtractedArticle, ExtractionRun, LogLevel, Outlet, OutletId, RunId, RunStatus};
use crate::selectors::{self, CompiledContentSelectors};
use crate::sink::ContentSink;
use crate::store::{Store, modify_outlet};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use url::Url;

/// Concurrency and timeout limits for runs.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// In-flight fetches within one run.
    pub per_run: usize,
    /// In-flight fetches across every run in the process.
    pub global: usize,
    /// Upper bound on any single fetch.
    pub fetch_timeout: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            per_run: 4,
            global: 16,
            fetch_timeout: Duration::from_secs(20),
        }
    }
}

/// A started run. The run keeps going whether or not this is awaited.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    pub outlet_id: OutletId,
    join: JoinHandle<ExtractionRun>,
}

impl RunHandle {
    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<ExtractionRun> {
        self.join.await.map_err(|e| Error::RunTask(e.to_string()))
    }
}

/// Releases the outlet's in-flight slot when dropped.
struct InFlightGuard {
    slots: Arc<DashMap<OutletId, RunId>>,
    outlet_id: OutletId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slots.remove(&self.outlet_id);
    }
}

#[derive(Default)]
struct Tally {
    listing_fetched: AtomicBool,
    found: AtomicU32,
    extracted: AtomicU32,
    failed: AtomicU32,
}

pub struct RunManager {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn ContentSink>,
    broadcaster: Broadcaster,
    limits: RunLimits,
    global: Arc<Semaphore>,
    in_flight: Arc<DashMap<OutletId, RunId>>,
}

impl RunManager {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn ContentSink>,
        broadcaster: Broadcaster,
        limits: RunLimits,
    ) -> Self {
        Self {
            store,
            fetcher,
            sink,
            broadcaster,
            global: Arc::new(Semaphore::new(limits.global.max(1))),
            limits,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Id of the run currently in flight for `outlet_id`, if any.
    pub fn running(&self, outlet_id: &str) -> Option<RunId> {
        self.in_flight.get(outlet_id).map(|r| r.value().clone())
    }

    /// Start a run for an active outlet.
    ///
    /// # Errors
    ///
    /// - [`Error::OutletNotFound`], [`Error::OutletDeactivated`], [`Error::OutletPaused`]
    /// - [`Error::AlreadyRunning`] when a run for this outlet is in flight
    #[instrument(level = "info", skip_all, fields(outlet_id = %outlet_id))]
    pub async fn start(self: &Arc<Self>, outlet_id: &str) -> Result<RunHandle> {
        let outlet = self
            .store
            .get_outlet(outlet_id)
            .await
            .map_err(Error::from_store)?;
        if outlet.is_deactivated() {
            return Err(Error::OutletDeactivated(outlet.id));
        }
        if !outlet.is_active {
            return Err(Error::OutletPaused(outlet.id));
        }

        let run = ExtractionRun::start(&outlet.id);
        let guard = self.claim(&outlet.id, &run.id)?;
        self.store.insert_run(run.clone()).await?;
        let channel = self.broadcaster.open(&outlet.id, &run.id);
        info!(run_id = %run.id, "Run started");

        let handle = RunHandle {
            run_id: run.id.clone(),
            outlet_id: outlet.id.clone(),
            join: tokio::spawn(Arc::clone(self).execute(outlet, run, guard, channel)),
        };
        Ok(handle)
    }

    fn claim(&self, outlet_id: &str, run_id: &str) -> Result<InFlightGuard> {
        match self.in_flight.entry(outlet_id.to_string()) {
            Entry::Occupied(existing) => Err(Error::AlreadyRunning {
                outlet_id: outlet_id.to_string(),
                run_id: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(run_id.to_string());
                Ok(InFlightGuard {
                    slots: Arc::clone(&self.in_flight),
                    outlet_id: outlet_id.to_string(),
                })
            }
        }
    }

    async fn execute(
        self: Arc<Self>,
        outlet: Outlet,
        mut run: ExtractionRun,
        _guard: InFlightGuard,
        channel: RunChannel,
    ) -> ExtractionRun {
        let tally = Tally::default();
        let outcome = AssertUnwindSafe(self.extract(&outlet, &run.id, &channel, &tally))
            .catch_unwind()
            .await;

        let error_message = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => {
                // URLs the aborted run never got to are failures of this run.
                let settled =
                    tally.extracted.load(Ordering::SeqCst) + tally.failed.load(Ordering::SeqCst);
                let unprocessed = tally.found.load(Ordering::SeqCst).saturating_sub(settled);
                tally.failed.fetch_add(unprocessed, Ordering::SeqCst);
                Some(format!("run aborted: {}", panic_message(&panic)))
            }
        };

        // Any run-level error fails the run, even after a good listing fetch.
        let listing_ok = tally.listing_fetched.load(Ordering::SeqCst) && error_message.is_none();
        run.finish(
            listing_ok,
            tally.found.load(Ordering::SeqCst),
            tally.extracted.load(Ordering::SeqCst),
            tally.failed.load(Ordering::SeqCst),
            error_message,
        );

        let level = match run.status {
            RunStatus::Completed => LogLevel::Info,
            RunStatus::Partial => LogLevel::Warn,
            _ => LogLevel::Error,
        };
        let mut summary = format!(
            "Run {}: {} found, {} extracted, {} failed in {:.1}s",
            run.status,
            run.total_urls_found,
            run.total_content_extracted,
            run.total_failed,
            run.duration
        );
        if let Some(message) = &run.error_message {
            summary.push_str(&format!(" ({message})"));
        }
        channel.emit(level, summary);
        // The stream ends before the terminal row becomes visible.
        drop(channel);

        match self.store.complete_run(&run).await {
            Ok(stats) => info!(
                outlet_id = %outlet.id,
                run_id = %run.id,
                success_rate = stats.success_rate,
                "Statistics updated"
            ),
            Err(e) => error!(outlet_id = %outlet.id, run_id = %run.id, error = %e, "Failed to persist run"),
        }
        let finished_at = run.finished_at;
        if let Err(e) = modify_outlet(self.store.as_ref(), &outlet.id, move |o| {
            o.last_extraction_run = finished_at;
        })
        .await
        {
            warn!(outlet_id = %outlet.id, error = %e, "Failed to record lastExtractionRun");
        }
        run
    }

    async fn extract(
        &self,
        outlet: &Outlet,
        run_id: &str,
        channel: &RunChannel,
        tally: &Tally,
    ) -> Result<()> {
        channel.info(format!("Fetching listing page {}", outlet.listing_url));
        let listing_selector = selectors::compile_listing(&outlet.listing_selectors)?;
        let content_selectors = CompiledContentSelectors::compile(&outlet.content_selectors)?;
        let options = FetchOptions {
            use_javascript: outlet.use_java_script,
        };

        let listing = match self.fetch(&outlet.listing_url, options).await {
            Ok(page) => page,
            Err(e) => {
                channel.error(format!("Listing fetch failed: {e}"));
                return Err(e);
            }
        };
        tally.listing_fetched.store(true, Ordering::SeqCst);

        let candidates = selectors::extract_links(&listing.html, &listing_selector, &outlet.base_url);
        if candidates.is_empty() {
            channel.warn("Listing selector matched no article links");
        }
        let known = self.store.extracted_urls(&outlet.id).await?;
        let new_urls: Vec<String> = candidates
            .iter()
            .filter(|url| !known.contains(*url))
            .cloned()
            .collect();
        tally.found.store(new_urls.len() as u32, Ordering::SeqCst);
        channel.info(format!(
            "Found {} links, {} new",
            candidates.len(),
            new_urls.len()
        ));

        stream::iter(new_urls)
            .map(|url| self.extract_one(outlet, run_id, url, &content_selectors, options, channel, tally))
            .buffer_unordered(self.limits.per_run.max(1))
            .for_each(|_| futures::future::ready(()))
            .await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn extract_one(
        &self,
        outlet: &Outlet,
        run_id: &str,
        url: String,
        content_selectors: &CompiledContentSelectors,
        options: FetchOptions,
        channel: &RunChannel,
        tally: &Tally,
    ) {
        let article = self.extract_article(outlet, run_id, &url, content_selectors, options);
        let attempt = AssertUnwindSafe(article).catch_unwind().await;
        match attempt {
            Ok(Ok(article)) => {
                if let Err(e) = self.store.mark_extracted(&outlet.id, &url).await {
                    warn!(%url, error = %e, "Extracted URL could not be recorded as known");
                }
                tally.extracted.fetch_add(1, Ordering::SeqCst);
                channel.info(format!("Extracted {url}: {}", article.content.title));
            }
            Ok(Err(e)) => {
                tally.failed.fetch_add(1, Ordering::SeqCst);
                channel.warn(format!("Failed {url}: {e}"));
            }
            Err(panic) => {
                let message = panic_message(&panic);
                error!(%url, panic = %message, "Article extraction panicked");
                tally.failed.fetch_add(1, Ordering::SeqCst);
                channel.warn(format!("Failed {url}: panicked: {message}"));
            }
        }
    }

    async fn extract_article(
        &self,
        outlet: &Outlet,
        run_id: &str,
        url: &str,
        content_selectors: &CompiledContentSelectors,
        options: FetchOptions,
    ) -> Result<ExtractedArticle> {
        let parsed = Url::parse(url).map_err(|e| Error::RunTask(format!("bad URL {url}: {e}")))?;
        let page = self.fetch(&parsed, options).await?;
        let content = selectors::extract_content(&page.html, content_selectors, &page.url)?;
        let article = ExtractedArticle {
            content,
            source_url: url.to_string(),
            outlet_id: outlet.id.clone(),
            run_id: run_id.to_string(),
            extracted_at: Utc::now(),
        };
        self.sink
            .store(&article)
            .await
            .map_err(|e| Error::RunTask(format!("could not persist content: {e}")))?;
        Ok(article)
    }

    /// Fetch under the process-wide cap and the per-fetch timeout.
    async fn fetch(&self, url: &Url, options: FetchOptions) -> Result<Page> {
        let _permit = self
            .global
            .acquire()
            .await
            .map_err(|e| Error::RunTask(e.to_string()))?;
        Ok(fetch_with_timeout(self.fetcher.as_ref(), url, options, self.limits.fetch_timeout).await?)
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
