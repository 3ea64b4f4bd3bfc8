//! Data models for search sessions, harvested links and run reports

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One (job name, location) pair driving a single discovery session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchTuple {
    pub job_name: String,
    pub location: String,
}

impl SearchTuple {
    pub fn new(job_name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            location: location.into(),
        }
    }

    /// Cartesian product of the configured job names and locations.
    ///
    /// Locations form the outer loop, so every job name is searched in the first
    /// location before moving on to the next one.
    pub fn product(job_names: &[String], locations: &[String]) -> Vec<Self> {
        locations
            .iter()
            .flat_map(|location| {
                job_names
                    .iter()
                    .map(move |job_name| Self::new(job_name.clone(), location.clone()))
            })
            .collect()
    }
}

impl fmt::Display for SearchTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.job_name, self.location)
    }
}

/// A job posting link as persisted in `links.jsonl`.
///
/// Field order matches the on-disk line layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: String,
    pub data_index: String,
    pub job_name: String,
    pub location: String,
    pub url: String,
    pub new_href: bool,
}

/// Why a discovery session stopped scrolling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    #[default]
    None,
    /// The search page loaded without any listing
    NoResults,
    TargetIndexReached,
    MaxBatchesReached,
    NoGrowthTimeout,
    LimitReached,
    TimeBudgetExhausted,
    Cancelled,
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::NoResults => "no_results",
            Self::TargetIndexReached => "target_index_reached",
            Self::MaxBatchesReached => "max_batches_reached",
            Self::NoGrowthTimeout => "no_growth_timeout",
            Self::LimitReached => "limit_reached",
            Self::TimeBudgetExhausted => "time_budget_exhausted",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Per-session scroll bookkeeping, discarded when the session ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollState {
    pub consecutive_no_growth_batches: u32,
    pub total_batches: u32,
    pub last_seen_item_count: usize,
    pub stop_reason: StopReason,
}

impl ScrollState {
    /// Records the distinct item count seen after a batch.
    ///
    /// Returns `true` when the count grew since the previous batch.
    pub fn observe_batch(&mut self, item_count: usize) -> bool {
        self.total_batches += 1;
        let grew = item_count > self.last_seen_item_count;
        if grew {
            self.consecutive_no_growth_batches = 0;
            self.last_seen_item_count = item_count;
        } else {
            self.consecutive_no_growth_batches += 1;
        }
        grew
    }
}

impl fmt::Display for ScrollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batches={} no_growth={} items={} stop={}",
            self.total_batches,
            self.consecutive_no_growth_batches,
            self.last_seen_item_count,
            self.stop_reason
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    CookieBanner,
    Modal,
    FixedHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    Dismissed,
    Clicked,
    Ignored,
}

/// A blocking surface found on the page and what was done about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayEvent {
    pub kind: OverlayKind,
    pub action_taken: OverlayAction,
}

/// Result of a single tuple's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleOutcome {
    Completed,
    Failed {
        error: String,
        artifact: Option<PathBuf>,
    },
}

/// Per-tuple line of the run summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleReport {
    pub job_name: String,
    pub location: String,
    pub added: usize,
    pub total_known: usize,
    pub stop_reason: StopReason,
    pub outcome: TupleOutcome,
}

impl TupleReport {
    pub fn limit_hit(&self) -> bool {
        self.stop_reason == StopReason::LimitReached
    }
}

/// Totals for a whole run across every tuple
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tuples: Vec<TupleReport>,
    pub total_added: usize,
    pub total_known: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn failed_tuples(&self) -> usize {
        self.tuples
            .iter()
            .filter(|report| matches!(report.outcome, TupleOutcome::Failed { .. }))
            .count()
    }
}
