//! Error types shared across the discovery engine

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`PageDriver`](crate::traits::PageDriver) implementation
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element detached from the document: {0}")]
    Detached(String),

    #[error("interaction intercepted on {0}")]
    Intercepted(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl DriverError {
    /// Transient UI anomalies are worth retrying in place
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ElementNotFound(_) | Self::Detached(_) | Self::Intercepted(_)
        )
    }
}

/// Failure of the durable record log
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record log I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("record log {path} could not be restored after a failed write")]
    Poisoned { path: PathBuf },
}

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors crossing into the session orchestrator
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("search page {url} did not load: {source}")]
    Navigation {
        url: String,
        #[source]
        source: DriverError,
    },

    #[error("{what} failed after retries: {source}")]
    Interaction {
        what: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl CollectError {
    /// Fatal errors stop the run regardless of `FAIL_FAST`
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
