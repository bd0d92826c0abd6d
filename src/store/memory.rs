//! In-memory [`Store`] implementation.
//!
//! All state sits behind a single `RwLock`, so a terminal run write and the
//! matching statistics increment are applied together: a statistics read
//! that follows `complete_run` always reflects that run.

use super::Store;
use crate::error::StoreError;
use crate::models::{ExtractionRun, Outlet, OutletStatistics, RunStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Everything the store holds. Also the on-disk snapshot format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    pub outlets: HashMap<String, Outlet>,
    /// Append-only, in insertion order.
    pub runs: Vec<ExtractionRun>,
    pub statistics: HashMap<String, OutletStatistics>,
    pub extracted_urls: HashMap<String, HashSet<String>>,
}

impl StoreState {
    /// Close runs a crashed process left `in_progress`.
    ///
    /// Returns how many runs were closed.
    pub fn recover_interrupted_runs(&mut self) -> usize {
        let mut recovered = 0;
        for run in self
            .runs
            .iter_mut()
            .filter(|r| r.status == RunStatus::InProgress)
        {
            run.finish(false, 0, 0, 0, Some("interrupted by restart".to_string()));
            self.statistics
                .entry(run.outlet_id.clone())
                .or_default()
                .record(run);
            recovered += 1;
        }
        if recovered > 0 {
            warn!(recovered, "Closed runs interrupted by a restart");
        }
        recovered
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Point-in-time copy of the whole store.
    pub fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_outlet(&self, outlet: Outlet) -> Result<Outlet, StoreError> {
        let mut state = self.state.write();
        state.outlets.insert(outlet.id.clone(), outlet.clone());
        Ok(outlet)
    }

    async fn get_outlet(&self, id: &str) -> Result<Outlet, StoreError> {
        self.state
            .read()
            .outlets
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::OutletNotFound(id.to_string()))
    }

    async fn list_outlets(&self) -> Result<Vec<Outlet>, StoreError> {
        let mut outlets: Vec<Outlet> = self.state.read().outlets.values().cloned().collect();
        outlets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(outlets)
    }

    async fn update_outlet(&self, mut outlet: Outlet) -> Result<Outlet, StoreError> {
        let mut state = self.state.write();
        let current = state
            .outlets
            .get_mut(&outlet.id)
            .ok_or_else(|| StoreError::OutletNotFound(outlet.id.clone()))?;
        if current.version != outlet.version {
            return Err(StoreError::Conflict {
                id: outlet.id,
                expected: outlet.version,
                found: current.version,
            });
        }
        outlet.version += 1;
        *current = outlet.clone();
        Ok(outlet)
    }

    async fn insert_run(&self, run: ExtractionRun) -> Result<(), StoreError> {
        self.state.write().runs.push(run);
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<ExtractionRun, StoreError> {
        self.state
            .read()
            .runs
            .iter()
            .rev()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))
    }

    async fn complete_run(&self, run: &ExtractionRun) -> Result<OutletStatistics, StoreError> {
        let mut state = self.state.write();
        let row = state
            .runs
            .iter_mut()
            .rev()
            .find(|r| r.id == run.id)
            .ok_or_else(|| StoreError::RunNotFound(run.id.clone()))?;
        if row.is_finished() {
            return Err(StoreError::RunFinalized(run.id.clone()));
        }
        *row = run.clone();

        let stats = state.statistics.entry(run.outlet_id.clone()).or_default();
        stats.record(run);
        Ok(stats.clone())
    }

    async fn mark_extracted(&self, outlet_id: &str, url: &str) -> Result<(), StoreError> {
        self.state
            .write()
            .extracted_urls
            .entry(outlet_id.to_string())
            .or_default()
            .insert(url.to_string());
        Ok(())
    }

    async fn extracted_urls(&self, outlet_id: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .state
            .read()
            .extracted_urls
            .get(outlet_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn statistics(&self, outlet_id: &str) -> Result<OutletStatistics, StoreError> {
        let state = self.state.read();
        if !state.outlets.contains_key(outlet_id) {
            return Err(StoreError::OutletNotFound(outlet_id.to_string()));
        }
        Ok(state.statistics.get(outlet_id).cloned().unwrap_or_default())
    }

    async fn history(
        &self,
        outlet_id: &str,
        limit: usize,
    ) -> Result<Vec<ExtractionRun>, StoreError> {
        let state = self.state.read();
        if !state.outlets.contains_key(outlet_id) {
            return Err(StoreError::OutletNotFound(outlet_id.to_string()));
        }
        let mut runs: Vec<ExtractionRun> = state
            .runs
            .iter()
            .filter(|r| r.outlet_id == outlet_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
