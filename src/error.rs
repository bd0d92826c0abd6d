//! Error taxonomy for the extraction pipeline.
//!
//! Each concern gets its own error type so callers can tell a per-URL
//! failure (which is recorded and aggregated) apart from a failure that
//! must be surfaced to the operator:
//!
//! | Type | Raised by | Effect |
//! |------|-----------|--------|
//! | [`ValidationError`] | Registry, config loading | Rejected before persistence, never retried |
//! | [`FetchError`] | Fetch collaborator | Listing fetch fails the run, content fetch fails one URL |
//! | [`SelectorMismatchError`] | Selector engine (content mode) | Fails one URL, never the run |
//! | [`InferenceUnavailableError`] | Inference adapter | Caller falls back to manual configuration |
//! | [`StoreError`] | Persistence collaborator | Propagated to the caller |

use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Bad outlet configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is not a valid CSS selector ({selector:?}): {reason}")]
    InvalidSelector {
        field: &'static str,
        selector: String,
        reason: String,
    },

    #[error("{field} must be between 1 and 1440 minutes, got {value}")]
    FrequencyOutOfRange { field: &'static str, value: u32 },

    #[error("{field} is not a valid absolute http(s) URL: {value:?}")]
    InvalidUrl { field: &'static str, value: String },
}

/// Network or HTTP failure while fetching a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("GET {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
}

/// A required content field came back empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("selector for required field `{field}` matched no text")]
pub struct SelectorMismatchError {
    pub field: &'static str,
}

/// The selector inference service could not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("selector inference unavailable: {reason}")]
pub struct InferenceUnavailableError {
    pub reason: String,
}

impl InferenceUnavailableError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("outlet {0} not found")]
    OutletNotFound(String),

    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("outlet {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("run {0} is already finished and can no longer change")]
    RunFinalized(String),

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Top-level error returned by the exposed operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    SelectorMismatch(#[from] SelectorMismatchError),

    #[error(transparent)]
    InferenceUnavailable(#[from] InferenceUnavailableError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("outlet {0} not found")]
    OutletNotFound(String),

    #[error("outlet {0} is paused")]
    OutletPaused(String),

    #[error("outlet {0} is deactivated")]
    OutletDeactivated(String),

    #[error("outlet {outlet_id} already has run {run_id} in progress")]
    AlreadyRunning { outlet_id: String, run_id: String },

    #[error("run task failed: {0}")]
    RunTask(String),
}

impl Error {
    /// Maps the store's not-found variant onto the operator-facing one.
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::OutletNotFound(id) => Error::OutletNotFound(id),
            other => Error::Store(other),
        }
    }
}
