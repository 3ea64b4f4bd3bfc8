//! Collector configuration and data directory layout
//!
//! Settings come from a JSON file shared with the later pipeline stages, so keys
//! this crate does not know are ignored. The file is looked up in order:
//!
//! 1. the path in the `CONFIG` environment variable, if it names a file;
//! 2. `config/config.json` relative to the working directory;
//! 3. built-in defaults.
//!
//! Keys missing from the file fall back to their defaults. The loaded value is
//! validated once and then handed to the collector as an immutable structure.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::scroll::{Jitter, Pacing};
use crate::sites::justjoin::DEFAULT_BASE_URL;

pub const CONFIG_ENV: &str = "CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Fully resolved collector settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    pub job_names: Vec<String>,
    pub locations: Vec<String>,
    pub headful: bool,
    /// Stop a session once a listing with at least this data-index shows up
    #[serde(deserialize_with = "lenient_count")]
    pub target_indexes: Option<u64>,
    pub fail_fast: bool,
    pub allow_cookie_click: bool,
    pub allow_load_more_click: bool,
    /// Stop a session once more than this many new links were stored
    #[serde(deserialize_with = "lenient_count")]
    pub limit: Option<u64>,
    pub max_loop_seconds: u64,
    pub no_growth_batches: u32,
    pub max_batches: u32,
    pub scroll_batch_steps: u32,
    pub scroll_step_px: i64,
    pub step_pause_min_ms: u64,
    pub step_pause_max_ms: u64,
    pub settle_min_ms: u64,
    pub settle_max_ms: u64,
    pub short_timeout_min: u64,
    pub short_timeout_max: u64,
    pub long_timeout_min: u64,
    pub long_timeout_max: u64,
    pub navigation_timeout_seconds: u64,
    pub ready_timeout_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub base_url: Option<String>,
    pub data_dir: PathBuf,
    pub user_data_dir: Option<PathBuf>,
    pub schedule: Option<String>,
    pub run_timeout_seconds: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            job_names: vec!["QA Automation".to_string()],
            locations: vec!["poland-remote".to_string(), "remote".to_string()],
            headful: true,
            target_indexes: Some(1000),
            fail_fast: true,
            allow_cookie_click: false,
            allow_load_more_click: false,
            limit: None,
            max_loop_seconds: 320,
            no_growth_batches: 3,
            max_batches: 200,
            scroll_batch_steps: 10,
            scroll_step_px: 100,
            step_pause_min_ms: 80,
            step_pause_max_ms: 200,
            settle_min_ms: 1200,
            settle_max_ms: 2200,
            short_timeout_min: 60,
            short_timeout_max: 180,
            long_timeout_min: 300,
            long_timeout_max: 660,
            navigation_timeout_seconds: 30,
            ready_timeout_seconds: 15,
            retry_max_attempts: 3,
            retry_backoff_ms: 250,
            base_url: None,
            data_dir: PathBuf::from("data"),
            user_data_dir: None,
            schedule: None,
            run_timeout_seconds: None,
        }
    }
}

impl Config {
    /// Load settings using the `CONFIG` → `config/config.json` → defaults lookup
    pub fn load() -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .filter(|path| path.is_file());
        let candidate = from_env.or_else(|| {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            path.is_file().then_some(path)
        });

        match candidate {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_path(&path)
            }
            None => {
                info!("No configuration file found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_names.iter().all(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid("JOB_NAMES must not be empty".into()));
        }
        if self.locations.iter().all(|loc| loc.trim().is_empty()) {
            return Err(ConfigError::Invalid("LOCATIONS must not be empty".into()));
        }

        let ranges = [
            ("STEP_PAUSE", self.step_pause_min_ms, self.step_pause_max_ms),
            ("SETTLE", self.settle_min_ms, self.settle_max_ms),
            ("SHORT_TIMEOUT", self.short_timeout_min, self.short_timeout_max),
            ("LONG_TIMEOUT", self.long_timeout_min, self.long_timeout_max),
        ];
        for (name, min, max) in ranges {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "{name}_MIN ({min}) is greater than {name}_MAX ({max})"
                )));
            }
        }

        let positives = [
            ("NO_GROWTH_BATCHES", self.no_growth_batches),
            ("MAX_BATCHES", self.max_batches),
            ("SCROLL_BATCH_STEPS", self.scroll_batch_steps),
            ("RETRY_MAX_ATTEMPTS", self.retry_max_attempts),
        ];
        for (name, value) in positives {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }

        if self.scroll_step_px <= 0 {
            return Err(ConfigError::Invalid("SCROLL_STEP_PX must be positive".into()));
        }

        Ok(())
    }

    /// Fill in `BASE_URL` from the seeding stage's `state.json` when it is not configured
    pub fn resolve_base_url(&mut self, paths: &DataPaths) {
        if self.base_url.is_none() {
            self.base_url = paths.stored_base_url();
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            step_pause: Jitter::from_millis(self.step_pause_min_ms, self.step_pause_max_ms),
            settle: Jitter::from_millis(self.settle_min_ms, self.settle_max_ms),
        }
    }

    /// Cooldown between tuples; longer after a tuple that hit `LIMIT`
    pub fn cooldown(&self, limit_hit: bool) -> Jitter {
        if limit_hit {
            Jitter::from_secs(self.long_timeout_min, self.long_timeout_max)
        } else {
            Jitter::from_secs(self.short_timeout_min, self.short_timeout_max)
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }

    pub fn loop_budget(&self) -> Duration {
        Duration::from_secs(self.max_loop_seconds)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_seconds.map(Duration::from_secs)
    }

    /// `LIMIT` of zero means unlimited
    pub fn effective_limit(&self) -> Option<u64> {
        self.limit.filter(|limit| *limit > 0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CountValue {
    Number(u64),
    Text(String),
}

/// Accept `1000`, `"1000"`, `""` or `null` for optional counts
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<CountValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(CountValue::Number(value)) => Ok(Some(value)),
        Some(CountValue::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(CountValue::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected a count, got {text:?}"))),
    }
}

/// Files and directories under the data directory
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn links(&self) -> PathBuf {
        self.root.join("links.jsonl")
    }

    pub fn errors(&self) -> PathBuf {
        self.root.join("errors")
    }

    pub fn screenshots(&self) -> PathBuf {
        self.root.join("screenshots")
    }

    pub fn state(&self) -> PathBuf {
        self.root.join("state.json")
    }

    /// Browser cookies shared with the login stage
    pub fn storage_state(&self) -> PathBuf {
        self.root.join("storage_state.json")
    }

    /// Create the data, errors and screenshots directories
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [self.root.clone(), self.errors(), self.screenshots()] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// `base_url` recorded by the seeding stage, if any
    pub fn stored_base_url(&self) -> Option<String> {
        let path = self.state();
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(state) => state
                .get("base_url")
                .and_then(|value| value.as_str())
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(ToString::to_string),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                None
            }
        }
    }
}
