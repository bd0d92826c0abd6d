//! YAML configuration.
//!
//! Every section has defaults, so a missing file or a file that only sets a
//! few keys still produces a working configuration:
//!
//! ```yaml
//! concurrency:
//!   per_run: 4
//!   global: 16
//! fetch:
//!   timeout_secs: 20
//! inference:
//!   endpoint: http://localhost:8080/analyze
//!   timeout_secs: 30
//! storage:
//!   snapshot_path: ./state.json
//! outlets:
//!   - name: Example News
//!     baseUrl: https://news.example.com
//!     listingUrl: https://news.example.com/latest
//!     listingSelectors: { articleLinks: "a.headline" }
//!     contentSelectors: { titleSelector: "h1", contentSelector: "article p" }
//!     extractionFrequency: 30
//! ```
//!
//! Outlet entries use the same camelCase shape as the API and are validated
//! on load exactly as `createOutlet` would validate them.

use crate::error::ValidationError;
use crate::models::OutletConfig;
use crate::registry;
use crate::runner::RunLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("outlet #{index} ({name:?}) is invalid: {source}")]
    Outlet {
        index: usize,
        name: String,
        #[source]
        source: ValidationError,
    },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub per_run: usize,
    pub global: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            per_run: 4,
            global: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            user_agent: concat!("outlet_extractor/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

fn default_inference_timeout() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where the store is saved between restarts. No persistence when unset.
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            snapshot_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub output_dir: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./extracted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub concurrency: ConcurrencyConfig,
    pub fetch: FetchConfig,
    /// Selector inference backend; inference reports unavailable when unset.
    pub inference: Option<InferenceConfig>,
    pub storage: StorageConfig,
    pub sink: SinkConfig,
    pub broadcast: BroadcastConfig,
    /// Seed outlets, created only when the store starts empty.
    pub outlets: Vec<OutletConfig>,
}

impl AppConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency.per_run == 0 || self.concurrency.global == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.per_run and concurrency.global must be at least 1".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be at least 1".into()));
        }
        if self.storage.snapshot_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "storage.snapshot_interval_secs must be at least 1".into(),
            ));
        }
        for (index, outlet) in self.outlets.iter().enumerate() {
            registry::validate(outlet.clone()).map_err(|source| ConfigError::Outlet {
                index,
                name: outlet.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn run_limits(&self) -> RunLimits {
        RunLimits {
            per_run: self.concurrency.per_run,
            global: self.concurrency.global,
            fetch_timeout: self.fetch_timeout(),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.storage.snapshot_interval_secs)
    }
}

/// Load configuration from `path`, or defaults when no path is given.
pub async fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path else {
        debug!("No config file given; using defaults");
        return Ok(AppConfig::default());
    };

    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let config = AppConfig::from_yaml(&yaml, path)?;
    info!(
        path = %path.display(),
        outlets = config.outlets.len(),
        inference = config.inference.is_some(),
        "Loaded configuration"
    );
    Ok(config)
}
