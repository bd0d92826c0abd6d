//! # Outlet Extractor
//!
//! Scheduled article extraction for a fleet of news outlets. Each outlet has
//! a listing page and CSS selectors; on its own cadence the crate polls the
//! listing, extracts every article it has not seen yet, and records how the
//! run went.
//!
//! ## Architecture
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | Outlet CRUD, validation, pause/resume, selector dry runs |
//! | [`selectors`] | Listing and content extraction from HTML |
//! | [`inference`] | AI selector proposals behind one timeout and error type |
//! | [`runner`] | One extraction run, bounded concurrency, partial failure |
//! | [`scheduler`] | Per-outlet timers |
//! | [`store`] | Outlets, run history, statistics, known URLs |
//! | [`broadcast`] | Live run logs |
//! | [`service`] | The operator-facing facade |
//!
//! A run flows: scheduler tick (or manual trigger) → [`runner::RunManager`]
//! → fetch listing → [`selectors::extract_links`] → fetch and
//! [`selectors::extract_content`] per new URL → [`sink::ContentSink`] →
//! run record and statistics in the [`store::Store`], with every step
//! streamed through the [`broadcast::Broadcaster`].

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod inference;
pub mod models;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod selectors;
pub mod service;
pub mod sink;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use service::{Collaborators, ExtractionService};
