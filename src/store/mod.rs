//! Persistence collaborator.
//!
//! The rest of the crate talks to storage only through the [`Store`] trait:
//! outlet rows with compare-and-swap updates, an append-only run log,
//! per-outlet statistics and the set of URLs already extracted.
//!
//! # Implementations
//!
//! | Type | Notes |
//! |------|-------|
//! | [`MemoryStore`] | Process-local state behind one lock |
//! | [`snapshot`] | JSON save/load of a [`MemoryStore`] for restarts |

pub mod memory;
pub mod snapshot;

pub use memory::{MemoryStore, StoreState};

use crate::error::StoreError;
use crate::models::{ExtractionRun, Outlet, OutletStatistics};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

/// How often a compare-and-swap update is retried before giving up.
const MAX_CAS_ATTEMPTS: usize = 8;

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_outlet(&self, outlet: Outlet) -> Result<Outlet, StoreError>;

    async fn get_outlet(&self, id: &str) -> Result<Outlet, StoreError>;

    async fn list_outlets(&self) -> Result<Vec<Outlet>, StoreError>;

    /// Replace an outlet row if its `version` still matches the stored one.
    ///
    /// Returns the stored row with its version bumped, or
    /// [`StoreError::Conflict`] when another writer got there first.
    async fn update_outlet(&self, outlet: Outlet) -> Result<Outlet, StoreError>;

    /// Append a new `in_progress` run.
    async fn insert_run(&self, run: ExtractionRun) -> Result<(), StoreError>;

    async fn get_run(&self, id: &str) -> Result<ExtractionRun, StoreError>;

    /// Terminal write: replace the run row and fold it into the outlet's
    /// statistics in one step. Returns the updated statistics.
    async fn complete_run(&self, run: &ExtractionRun) -> Result<OutletStatistics, StoreError>;

    /// Record that `url` was successfully extracted for `outlet_id`.
    async fn mark_extracted(&self, outlet_id: &str, url: &str) -> Result<(), StoreError>;

    async fn extracted_urls(&self, outlet_id: &str) -> Result<HashSet<String>, StoreError>;

    async fn statistics(&self, outlet_id: &str) -> Result<OutletStatistics, StoreError>;

    /// Most recent `limit` runs, newest `started_at` first.
    async fn history(&self, outlet_id: &str, limit: usize)
    -> Result<Vec<ExtractionRun>, StoreError>;
}

/// Read-modify-write an outlet row with optimistic locking.
///
/// `change` is re-applied to a fresh read after every conflict, so it must
/// only depend on the row it is given.
pub async fn modify_outlet<F>(store: &dyn Store, id: &str, change: F) -> Result<Outlet, StoreError>
where
    F: Fn(&mut Outlet) + Send + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut outlet = store.get_outlet(id).await?;
        change(&mut outlet);
        match store.update_outlet(outlet).await {
            Err(StoreError::Conflict { expected, found, .. }) if attempt < MAX_CAS_ATTEMPTS => {
                debug!(outlet_id = %id, attempt, expected, found, "Outlet update conflicted; retrying");
            }
            other => return other,
        }
    }
}
