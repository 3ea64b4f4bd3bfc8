//! # Failure Diagnostics
//!
//! When a search session fails, the collector leaves two artifacts behind so the
//! failure can be reconstructed later without re-running the search:
//!
//! - **Text report** in `data/errors/`: timestamp, the failing `job|location`
//!   tuple, the search URL, the scroll state at the time of failure, how many
//!   links the session had already stored, and the full error chain.
//! - **Screenshot** in `data/screenshots/`: a full-page PNG of the browser page,
//!   captured best effort. A browser that cannot render one does not prevent the
//!   text report from being written.
//!
//! Both files share a `<prefix>_<YYYYmmdd_HHMMSS_mmm>` stem.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{Local, Utc};
use tracing::{error, warn};

use crate::models::{ScrollState, SearchTuple};
use crate::traits::PageDriver;

/// Artifact prefix for the link discovery stage
pub const DEFAULT_PREFIX: &str = "s2_collect";

/// Everything known about a failed session
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub tuple: &'a SearchTuple,
    pub search_url: &'a str,
    pub state: &'a ScrollState,
    pub added: usize,
    pub error: &'a (dyn std::error::Error + Send + Sync + 'static),
}

/// Paths written for one failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticArtifact {
    pub report: PathBuf,
    pub screenshot: Option<PathBuf>,
}

/// Writes failure reports and screenshots under the data directory
#[derive(Debug, Clone)]
pub struct Diagnostics {
    errors_dir: PathBuf,
    screenshots_dir: PathBuf,
    prefix: String,
}

impl Diagnostics {
    pub fn new(errors_dir: impl Into<PathBuf>, screenshots_dir: impl Into<PathBuf>) -> Self {
        Self {
            errors_dir: errors_dir.into(),
            screenshots_dir: screenshots_dir.into(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Capture a report, and a screenshot when a page is available.
    ///
    /// Returns `None` only when the text report itself could not be written; that
    /// failure is logged and never replaces the original error.
    pub async fn capture(
        &self,
        driver: Option<&mut dyn PageDriver>,
        failure: &FailureContext<'_>,
    ) -> Option<DiagnosticArtifact> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let report = self.errors_dir.join(format!("{}_{stamp}.txt", self.prefix));

        if let Err(e) = tokio::fs::create_dir_all(&self.errors_dir).await {
            error!("Failed to create {}: {}", self.errors_dir.display(), e);
            return None;
        }
        if let Err(e) = tokio::fs::write(&report, render_report(failure)).await {
            error!("Failed to write diagnostic report {}: {}", report.display(), e);
            return None;
        }

        let screenshot = match driver {
            Some(driver) => self.capture_screenshot(driver, &stamp).await,
            None => None,
        };

        error!(
            "[{}] {} failed; saved {}{}",
            self.prefix,
            failure.tuple,
            report.display(),
            screenshot
                .as_ref()
                .map(|png| format!(" and {}", png.display()))
                .unwrap_or_default()
        );

        Some(DiagnosticArtifact { report, screenshot })
    }

    async fn capture_screenshot(&self, driver: &mut dyn PageDriver, stamp: &str) -> Option<PathBuf> {
        let png = self.screenshots_dir.join(format!("{}_{stamp}.png", self.prefix));

        let bytes = match driver.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Screenshot capture failed: {}", e);
                return None;
            }
        };

        let written = match tokio::fs::create_dir_all(&self.screenshots_dir).await {
            Ok(()) => tokio::fs::write(&png, bytes).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Some(png),
            Err(e) => {
                warn!("Failed to save screenshot {}: {}", png.display(), e);
                None
            }
        }
    }
}

fn render_report(failure: &FailureContext<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "TIME: {}", Utc::now().to_rfc3339());
    let _ = writeln!(out, "STEP: {}", failure.tuple);
    let _ = writeln!(out, "URL: {}", failure.search_url);
    let _ = writeln!(out, "STATE: {}", failure.state);
    let _ = writeln!(out, "ADDED: {}", failure.added);
    let _ = writeln!(out);
    let _ = writeln!(out, "ERROR: {}", failure.error);

    let mut source = failure.error.source();
    while let Some(cause) = source {
        let _ = writeln!(out, "CAUSED BY: {cause}");
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollectError, DriverError};
    use crate::models::StopReason;
    use crate::testing::ScriptedPage;

    #[tokio::test]
    async fn test_report_describes_tuple_state_and_error_chain() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("errors"), dir.path().join("screenshots"));
        let tuple = SearchTuple::new("QA", "remote");
        let state = ScrollState {
            total_batches: 4,
            consecutive_no_growth_batches: 1,
            last_seen_item_count: 37,
            stop_reason: StopReason::Error,
        };
        let error = CollectError::Navigation {
            url: "https://justjoin.it/job-offers/remote?keyword=QA".into(),
            source: DriverError::Navigation("net::ERR_CONNECTION_RESET".into()),
        };
        let failure = FailureContext {
            tuple: &tuple,
            search_url: "https://justjoin.it/job-offers/remote?keyword=QA",
            state: &state,
            added: 12,
            error: &error,
        };
        let mut page = ScriptedPage::default();

        let artifact = diagnostics.capture(Some(&mut page), &failure).await.unwrap();

        let report = std::fs::read_to_string(&artifact.report).unwrap();
        assert!(report.contains("STEP: QA|remote"));
        assert!(report.contains("STATE: batches=4 no_growth=1 items=37 stop=error"));
        assert!(report.contains("ADDED: 12"));
        assert!(report.contains("CAUSED BY: navigation failed: net::ERR_CONNECTION_RESET"));

        let png = artifact.screenshot.unwrap();
        assert_eq!(png.extension().unwrap(), "png");
        assert!(png.exists());
    }

    #[tokio::test]
    async fn test_screenshot_failure_still_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("errors"), dir.path().join("screenshots"));
        let tuple = SearchTuple::new("QA", "remote");
        let state = ScrollState::default();
        let error = DriverError::Browser("tab crashed".into());
        let failure = FailureContext {
            tuple: &tuple,
            search_url: "https://justjoin.it",
            state: &state,
            added: 0,
            error: &error,
        };
        let mut page = ScriptedPage::default();
        page.fail_next("screenshot", DriverError::Browser("tab crashed".into()));

        let artifact = diagnostics.capture(Some(&mut page), &failure).await.unwrap();

        assert!(artifact.report.exists());
        assert!(artifact.screenshot.is_none());
    }
}
