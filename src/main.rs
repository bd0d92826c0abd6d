//! # Outlet Extractor
//!
//! Command-line front end for the extraction scheduler.
//!
//! ## Usage
//!
//! ```sh
//! outlet_extractor --config outlets.yaml serve
//! outlet_extractor --config outlets.yaml run-once --outlet "Example News"
//! ```
//!
//! `serve` restores the store from its snapshot (or seeds it from the config
//! outlets), arms one timer per outlet, and snapshots the store periodically
//! and once more on Ctrl-C. The other subcommands are one-shot tools.

use clap::Parser;
use futures::StreamExt;
use outlet_extractor::broadcast::RunLogMessage;
use outlet_extractor::cli::{Cli, Command};
use outlet_extractor::config::{self, AppConfig};
use outlet_extractor::error::StoreError;
use outlet_extractor::inference::InferenceRequest;
use outlet_extractor::models::ContentSelectors;
use outlet_extractor::store::{MemoryStore, snapshot};
use outlet_extractor::utils::ensure_writable_dir;
use outlet_extractor::{Error as ExtractorError, ExtractionService};
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(config = ?args.config, command = ?args.command, "Parsed CLI arguments");
    let config = config::load(args.config.as_deref()).await?;

    match args.command {
        Command::Serve => serve(&config).await?,
        Command::RunOnce { outlet } => run_once(&config, &outlet).await?,
        Command::TestListing {
            url,
            selector,
            base_url,
            js,
        } => {
            let (service, _) = build(&config).await?;
            let preview = service
                .test_listing_selectors(&url, &selector, base_url.as_deref(), js)
                .await?;
            print_json(&preview)?;
        }
        Command::TestContent {
            url,
            title,
            content,
            image,
            date,
            author,
            category,
            js,
        } => {
            let (service, _) = build(&config).await?;
            let selectors = ContentSelectors {
                title_selector: title,
                content_selector: content,
                image_selector: image,
                date_selector: date,
                author_selector: author,
                category_selector: category,
            };
            let content = service.test_content_selectors(&url, &selectors, js).await?;
            print_json(&content)?;
        }
        Command::Infer {
            name,
            base_url,
            listing_url,
            test_url,
        } => {
            let (service, _) = build(&config).await?;
            let request = InferenceRequest {
                name,
                base_url,
                listing_url,
                test_url,
            };
            match service.infer_selectors(&request).await {
                Ok(analysis) => print_json(&analysis)?,
                Err(ExtractorError::InferenceUnavailable(e)) => {
                    eprintln!("{e}");
                    eprintln!("Configure listing and content selectors manually.");
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

/// Restore the store from its snapshot, or start empty.
async fn open_store(config: &AppConfig) -> Result<Arc<MemoryStore>, StoreError> {
    let restored = match &config.storage.snapshot_path {
        Some(path) => snapshot::load(path).await?,
        None => None,
    };
    Ok(Arc::new(match restored {
        Some(state) => MemoryStore::from_state(state),
        None => MemoryStore::new(),
    }))
}

async fn build(config: &AppConfig) -> Result<(ExtractionService, Arc<MemoryStore>), Box<dyn Error>> {
    let store = open_store(config).await?;
    let service = ExtractionService::from_config(config, store.clone())?;
    service.seed(&config.outlets).await?;
    Ok((service, store))
}

async fn save_snapshot(config: &AppConfig, store: &MemoryStore) {
    let Some(path) = &config.storage.snapshot_path else {
        return;
    };
    if let Err(e) = snapshot::save(path, &store.snapshot()).await {
        error!(path = %path.display(), error = %e, "Failed to write store snapshot");
    }
}

#[instrument(level = "info", skip_all)]
async fn serve(config: &AppConfig) -> Result<(), Box<dyn Error>> {
    ensure_writable_dir(&config.sink.output_dir).await?;
    let (service, store) = build(config).await?;
    let armed = service.start().await?;
    info!(armed, "Serving; press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(config.snapshot_interval());
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => save_snapshot(config, &store).await,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Could not listen for Ctrl-C; shutting down");
                }
                break;
            }
        }
    }

    service.shutdown();
    save_snapshot(config, &store).await;
    info!("Stopped");
    Ok(())
}

#[instrument(level = "info", skip(config))]
async fn run_once(config: &AppConfig, outlet: &str) -> Result<(), Box<dyn Error>> {
    ensure_writable_dir(&config.sink.output_dir).await?;
    let (service, store) = build(config).await?;
    let outlet = service.find_outlet(outlet).await?;

    let handle = service.trigger_extraction(&outlet.id).await?;
    let mut log = service.subscribe_to_run_logs(&handle.run_id);
    while let Some(message) = log.next().await {
        match message {
            RunLogMessage::Event(event) => println!(
                "{} {:>5} {}",
                event.timestamp.to_rfc3339(),
                event.level,
                event.message
            ),
            RunLogMessage::CatchingUp { missed } => {
                println!("... {missed} earlier log lines not shown");
            }
        }
    }

    let run = handle.wait().await?;
    print_json(&run)?;
    save_snapshot(config, &store).await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
