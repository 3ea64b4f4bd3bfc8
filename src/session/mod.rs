//! Browser session state shared with the login stage
//!
//! `data/storage_state.json` holds the cookies saved by the login stage, in the
//! same layout the later stages read. The collector installs them before its
//! first search and writes the browser's cookies back after every search,
//! leaving the file's `origins` entries untouched. Both directions are best
//! effort: a missing or unreadable file only costs the seeded session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::traits::PageDriver;

/// One browser cookie as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    /// Seconds since the epoch; `-1` marks a session cookie
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    /// `Strict`, `Lax` or `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn root_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<serde_json::Value>,
}

pub struct SessionState {
    path: PathBuf,
}

impl SessionState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Option<StorageState> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Could not read {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Install the saved cookies into the browser, returning how many were set
    pub async fn restore(&self, driver: &mut dyn PageDriver) -> usize {
        let Some(state) = self.load().await else {
            info!("No saved session at {}, starting fresh", self.path.display());
            return 0;
        };
        if state.cookies.is_empty() {
            return 0;
        }

        match driver.set_cookies(&state.cookies).await {
            Ok(()) => {
                info!(
                    "Restored {} cookies from {}",
                    state.cookies.len(),
                    self.path.display()
                );
                state.cookies.len()
            }
            Err(e) => {
                warn!("Could not restore saved session: {}", e);
                0
            }
        }
    }

    /// Write the browser's current cookies back to the file
    pub async fn persist(&self, driver: &mut dyn PageDriver) -> bool {
        let cookies = match driver.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("Could not read browser cookies: {}", e);
                return false;
            }
        };

        let mut state = self.load().await.unwrap_or_default();
        state.cookies = cookies;

        let body = match serde_json::to_string_pretty(&state) {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not serialize session state: {}", e);
                return false;
            }
        };

        let staging = self.path.with_extension("json.tmp");
        let written = match tokio::fs::write(&staging, body).await {
            Ok(()) => tokio::fs::rename(&staging, &self.path).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                debug!("Saved {} cookies to {}", state.cookies.len(), self.path.display());
                true
            }
            Err(e) => {
                warn!("Could not save session state to {}: {}", self.path.display(), e);
                false
            }
        }
    }
}
