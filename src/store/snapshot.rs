//! JSON snapshots of a [`MemoryStore`](super::MemoryStore).
//!
//! Written to a sibling temp file and renamed into place so a crash during
//! the write never leaves a truncated snapshot behind.

use super::StoreState;
use crate::error::StoreError;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Write `state` to `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn save(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).await?;
    fs::rename(&tmp, path).await?;
    info!(
        outlets = state.outlets.len(),
        runs = state.runs.len(),
        bytes = json.len(),
        "Wrote store snapshot"
    );
    Ok(())
}

/// Read a snapshot. A missing file is `Ok(None)`.
///
/// Runs left `in_progress` by the previous process are closed as failed.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load(path: &Path) -> Result<Option<StoreState>, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No snapshot found; starting empty");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let mut state: StoreState = serde_json::from_slice(&bytes)?;
    state.recover_interrupted_runs();
    info!(
        outlets = state.outlets.len(),
        runs = state.runs.len(),
        "Loaded store snapshot"
    );
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionRun, RunStatus};
    use crate::store::{MemoryStore, Store};
    use crate::testing::sample_outlet;

    #[tokio::test]
    async fn test_snapshot_restores_outlets_and_closes_open_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state/store.json");

        let store = MemoryStore::new();
        store.insert_outlet(sample_outlet("o1")).await.unwrap();
        store.insert_run(ExtractionRun::start("o1")).await.unwrap();
        store.mark_extracted("o1", "https://example.com/a").await.unwrap();
        save(&path, &store.snapshot()).await.unwrap();

        let restored = MemoryStore::from_state(load(&path).await.unwrap().unwrap());
        assert_eq!(
            restored.get_outlet("o1").await.unwrap(),
            store.get_outlet("o1").await.unwrap()
        );
        assert!(restored
            .extracted_urls("o1")
            .await
            .unwrap()
            .contains("https://example.com/a"));
        let history = restored.history("o1", 10).await.unwrap();
        assert_eq!(history[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load(&tmp.path().join("nope.json")).await.unwrap().is_none());
    }
}
