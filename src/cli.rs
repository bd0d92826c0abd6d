//! Command-line interface definitions for the outlet extractor.
//!
//! This module defines the CLI subcommands and options using the `clap` crate.
//! The config path can come from a flag or the environment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the outlet extractor.
///
/// # Examples
///
/// ```sh
/// # Run the scheduler until Ctrl-C
/// outlet_extractor --config outlets.yaml serve
///
/// # Extract one outlet now and stream its log
/// outlet_extractor run-once --outlet "Example News"
///
/// # Try a listing selector without saving anything
/// outlet_extractor test-listing --url https://news.example.com/latest --selector "a.headline"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, env = "OUTLET_EXTRACTOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Arm every outlet's timer and run until interrupted
    Serve,

    /// Trigger one extraction run and print its live log and result
    RunOnce {
        /// Outlet name or id
        #[arg(long)]
        outlet: String,
    },

    /// Dry-run a listing selector against a page
    TestListing {
        #[arg(long)]
        url: String,

        #[arg(long)]
        selector: String,

        /// Resolve relative links against this URL instead of the page URL
        #[arg(long)]
        base_url: Option<String>,

        /// The page needs JavaScript rendering
        #[arg(long)]
        js: bool,
    },

    /// Dry-run content selectors against an article page
    TestContent {
        #[arg(long)]
        url: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        content: String,

        #[arg(long)]
        image: Option<String>,

        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        js: bool,
    },

    /// Ask the inference service to propose selectors for a new outlet
    Infer {
        #[arg(long)]
        name: String,

        #[arg(long)]
        base_url: String,

        #[arg(long)]
        listing_url: String,

        #[arg(long)]
        test_url: Option<String>,
    },
}
