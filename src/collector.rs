use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::diagnostics::{Diagnostics, FailureContext};
use crate::error::{CollectError, DriverError};
use crate::harvester::LinkHarvester;
use crate::models::{
    RunSummary, ScrollState, SearchTuple, StopReason, TupleOutcome, TupleReport,
};
use crate::overlay::OverlayMitigator;
use crate::retry::{RetryPolicy, retry_transient};
use crate::scroll::{ScrollDriver, ScrollSettings};
use crate::session::SessionState;
use crate::store::DedupeStore;
use crate::traits::{PageDriver, SearchSite};

/// Stop thresholds for one session, resolved from the configuration
#[derive(Debug, Clone, Copy)]
struct StopRules {
    target_index: Option<u64>,
    no_growth_batches: u32,
    max_batches: u32,
    limit: Option<u64>,
    loop_budget: Duration,
}

/// Mutable bookkeeping of the tuple being searched
#[derive(Debug, Default)]
struct Session {
    state: ScrollState,
    seen: HashSet<String>,
    max_index: Option<u64>,
    added: usize,
    anomalies: usize,
}

impl StopRules {
    /// First matching stop condition, in priority order
    fn evaluate(&self, session: &Session, elapsed: Duration) -> Option<StopReason> {
        let state = &session.state;

        if let (Some(target), Some(max_index)) = (self.target_index, session.max_index)
            && max_index >= target
        {
            return Some(StopReason::TargetIndexReached);
        }
        if state.consecutive_no_growth_batches >= self.no_growth_batches {
            return Some(StopReason::NoGrowthTimeout);
        }
        if state.total_batches >= self.max_batches {
            return Some(StopReason::MaxBatchesReached);
        }
        if let Some(limit) = self.limit
            && session.added as u64 > limit
        {
            return Some(StopReason::LimitReached);
        }
        if elapsed >= self.loop_budget {
            return Some(StopReason::TimeBudgetExhausted);
        }
        None
    }
}

/// Runs discovery sessions for every configured search and stores new links
pub struct LinkCollector {
    config: Arc<Config>,
    site: Arc<dyn SearchSite>,
    store: DedupeStore,
    diagnostics: Diagnostics,
    scroll: ScrollDriver,
    overlays: OverlayMitigator,
    harvester: LinkHarvester,
    retry: RetryPolicy,
    rules: StopRules,
    session_state: Option<SessionState>,
    cancel: CancellationToken,
}

impl LinkCollector {
    pub fn new(
        config: Arc<Config>,
        site: Arc<dyn SearchSite>,
        store: DedupeStore,
        diagnostics: Diagnostics,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let retry = config.retry_policy();
        let selectors = &site.profile().selectors;

        let scroll = ScrollDriver::new(
            ScrollSettings {
                batch_steps: config.scroll_batch_steps,
                step_px: config.scroll_step_px,
                pacing: config.pacing(),
                allow_load_more_click: config.allow_load_more_click,
            },
            selectors,
            retry,
        );
        let overlays = OverlayMitigator::new(selectors, config.allow_cookie_click, retry);
        let harvester = LinkHarvester::new(site.profile(), retry)?;
        let rules = StopRules {
            target_index: config.target_indexes,
            no_growth_batches: config.no_growth_batches,
            max_batches: config.max_batches,
            limit: config.effective_limit(),
            loop_budget: config.loop_budget(),
        };

        Ok(Self {
            config,
            site,
            store,
            diagnostics,
            scroll,
            overlays,
            harvester,
            retry,
            rules,
            session_state: None,
            cancel,
        })
    }

    /// Seed the browser from saved cookies and write them back after each search
    pub fn with_session_state(mut self, session_state: SessionState) -> Self {
        self.session_state = Some(session_state);
        self
    }

    pub fn store(&self) -> &DedupeStore {
        &self.store
    }

    /// Search every (job, location) tuple in order.
    ///
    /// Returns `Err` only when the run has to stop: a persistence failure, or any
    /// session failure while `FAIL_FAST` is set. Links stored before the failure
    /// stay stored.
    pub async fn run(&mut self, driver: &mut dyn PageDriver) -> Result<RunSummary, CollectError> {
        let tuples = SearchTuple::product(&self.config.job_names, &self.config.locations);
        let mut summary = RunSummary::default();

        info!(
            "Starting link discovery for {} searches on {} (limit: {:?}, known links: {})",
            tuples.len(),
            self.site.profile().name,
            self.rules.limit,
            self.store.total_known()
        );

        if let Some(session_state) = &self.session_state {
            session_state.restore(driver).await;
        }

        for (position, tuple) in tuples.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let report = self.collect_tuple(driver, tuple).await?;
            let limit_hit = report.limit_hit();
            summary.total_added += report.added;
            summary.cancelled = report.stop_reason == StopReason::Cancelled;
            summary.tuples.push(report);

            if summary.cancelled {
                break;
            }
            if position + 1 < tuples.len() {
                self.cooldown(limit_hit).await;
            }
        }

        summary.total_known = self.store.total_known();
        info!(
            total_added = summary.total_added,
            total_known = summary.total_known,
            failed = summary.failed_tuples(),
            cancelled = summary.cancelled,
            "Run finished"
        );

        Ok(summary)
    }

    async fn collect_tuple(
        &mut self,
        driver: &mut dyn PageDriver,
        tuple: &SearchTuple,
    ) -> Result<TupleReport, CollectError> {
        let search_url = self.site.build_search_url(tuple);
        let mut session = Session::default();

        let result = self.run_session(driver, tuple, &search_url, &mut session).await;
        if let Some(session_state) = &self.session_state {
            session_state.persist(driver).await;
        }

        if session.anomalies > 0 {
            warn!("Skipped {} malformed listing cards for {}", session.anomalies, tuple);
        }

        let outcome = match result {
            Ok(()) => TupleOutcome::Completed,
            Err(err) => {
                session.state.stop_reason = StopReason::Error;
                let failure = FailureContext {
                    tuple,
                    search_url: &search_url,
                    state: &session.state,
                    added: session.added,
                    error: &err,
                };
                let artifact = self.diagnostics.capture(Some(driver), &failure).await;

                if err.is_fatal() || self.config.fail_fast {
                    error!("Aborting run after {} failed: {}", tuple, err);
                    return Err(err);
                }

                warn!("Skipping {} after error: {}", tuple, err);
                TupleOutcome::Failed {
                    error: err.to_string(),
                    artifact: artifact.map(|artifact| artifact.report),
                }
            }
        };

        let report = TupleReport {
            job_name: tuple.job_name.clone(),
            location: tuple.location.clone(),
            added: session.added,
            total_known: self.store.total_known(),
            stop_reason: session.state.stop_reason,
            outcome,
        };

        info!(
            job_name = %report.job_name,
            location = %report.location,
            added = report.added,
            total_known = report.total_known,
            stop_reason = %report.stop_reason,
            batches = session.state.total_batches,
            "Search finished"
        );

        Ok(report)
    }

    async fn run_session(
        &mut self,
        driver: &mut dyn PageDriver,
        tuple: &SearchTuple,
        search_url: &str,
        session: &mut Session,
    ) -> Result<(), CollectError> {
        let navigation_error = |source| CollectError::Navigation {
            url: search_url.to_string(),
            source,
        };

        info!("Opening search {}", search_url);
        let timeout = self.config.navigation_timeout();
        retry_transient!(self.retry, "navigate", driver.navigate(search_url, timeout))
            .map_err(navigation_error)?;

        let listing_item = &self.site.profile().selectors.listing_item;
        match driver
            .wait_for_selector(listing_item, self.config.ready_timeout())
            .await
        {
            Ok(()) => {}
            Err(DriverError::Timeout { after, .. }) => {
                info!("No listings for {} after {:?}", tuple, after);
                session.state.stop_reason = StopReason::NoResults;
                return Ok(());
            }
            Err(e) => return Err(navigation_error(e)),
        }

        self.overlays.mitigate(driver).await;
        self.scroll.wake(driver).await;

        let started = Instant::now();
        self.harvest_and_store(driver, tuple, session).await?;
        session.state.last_seen_item_count = session.seen.len();

        loop {
            if let Some(reason) = self.rules.evaluate(session, started.elapsed()) {
                session.state.stop_reason = reason;
                break;
            }
            if self.cancel.is_cancelled() {
                session.state.stop_reason = StopReason::Cancelled;
                break;
            }

            let overlays = self.overlays.mitigate(driver).await;
            if !overlays.is_empty() {
                self.scroll.wake(driver).await;
            }

            let batch = self
                .scroll
                .run_batch(driver)
                .await
                .map_err(|source| CollectError::Interaction {
                    what: "scroll batch",
                    source,
                })?;

            self.harvest_and_store(driver, tuple, session).await?;
            let grew = session.state.observe_batch(session.seen.len());

            info!(
                batch = session.state.total_batches,
                steps = batch.steps_moved,
                bottom = batch.reached_bottom,
                seen = session.seen.len(),
                added = session.added,
                grew,
                "Scroll batch done"
            );
        }

        Ok(())
    }

    /// Harvest the current snapshot and persist what is new
    async fn harvest_and_store(
        &mut self,
        driver: &mut dyn PageDriver,
        tuple: &SearchTuple,
        session: &mut Session,
    ) -> Result<(), CollectError> {
        let harvest = self
            .harvester
            .read(driver, tuple)
            .await
            .map_err(|source| CollectError::Interaction {
                what: "harvest",
                source,
            })?;

        session.anomalies += harvest.anomalies;
        for record in &harvest.records {
            session.seen.insert(record.url.clone());
            if let Ok(index) = record.data_index.parse::<u64>() {
                session.max_index = session.max_index.max(Some(index));
            }
        }

        let appended = self.store.propose(harvest.records)?;
        for record in &appended {
            info!("Collected new link {}", record.url);
        }
        session.added += appended.len();

        Ok(())
    }

    /// Pause between searches; cancellation cuts the wait short
    async fn cooldown(&self, limit_hit: bool) {
        let wait = self.config.cooldown(limit_hit).sample();
        if wait.is_zero() {
            return;
        }

        info!(
            "Waiting {:.1} minutes before next search (limit hit: {})",
            wait.as_secs_f64() / 60.0,
            limit_hit
        );
        tokio::select! {
            _ = self.cancel.cancelled() => info!("Cooldown interrupted by cancellation"),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::JustJoin;
    use crate::testing::{Call, ScriptedPage};

    fn rules() -> StopRules {
        StopRules {
            target_index: Some(100),
            no_growth_batches: 3,
            max_batches: 50,
            limit: Some(20),
            loop_budget: Duration::from_secs(320),
        }
    }

    #[test]
    fn test_target_index_wins_over_other_conditions() {
        let session = Session {
            max_index: Some(100),
            state: ScrollState {
                consecutive_no_growth_batches: 3,
                total_batches: 50,
                ..ScrollState::default()
            },
            ..Session::default()
        };

        assert_eq!(
            rules().evaluate(&session, Duration::ZERO),
            Some(StopReason::TargetIndexReached)
        );
    }

    #[test]
    fn test_no_growth_precedes_batch_ceiling() {
        let session = Session {
            max_index: Some(99),
            state: ScrollState {
                consecutive_no_growth_batches: 3,
                total_batches: 50,
                ..ScrollState::default()
            },
            ..Session::default()
        };

        assert_eq!(
            rules().evaluate(&session, Duration::ZERO),
            Some(StopReason::NoGrowthTimeout)
        );
    }

    #[test]
    fn test_limit_requires_strictly_more_links() {
        let mut session = Session {
            added: 20,
            ..Session::default()
        };
        assert_eq!(rules().evaluate(&session, Duration::ZERO), None);

        session.added = 21;
        assert_eq!(
            rules().evaluate(&session, Duration::ZERO),
            Some(StopReason::LimitReached)
        );
    }

    #[test]
    fn test_time_budget_is_last_resort() {
        let session = Session::default();

        assert_eq!(
            rules().evaluate(&session, Duration::from_secs(320)),
            Some(StopReason::TimeBudgetExhausted)
        );
        assert_eq!(rules().evaluate(&session, Duration::from_secs(319)), None);
    }

    #[tokio::test]
    async fn test_failed_write_aborts_run_without_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            job_names: vec!["QA Automation".to_string()],
            locations: vec!["warszawa".to_string(), "remote".to_string()],
            fail_fast: false,
            target_indexes: None,
            step_pause_min_ms: 0,
            step_pause_max_ms: 0,
            settle_min_ms: 0,
            settle_max_ms: 0,
            short_timeout_min: 0,
            short_timeout_max: 0,
            long_timeout_min: 0,
            long_timeout_max: 0,
            retry_backoff_ms: 0,
            ..Config::default()
        };
        let site = JustJoin::default();
        let selectors = site.profile().selectors.clone();

        let mut store = DedupeStore::open(dir.path().join("links.jsonl")).unwrap();
        store.fail_next_write();
        let mut collector = LinkCollector::new(
            Arc::new(config),
            Arc::new(site),
            store,
            Diagnostics::new(dir.path().join("errors"), dir.path().join("screenshots")),
            CancellationToken::new(),
        )
        .unwrap();

        let mut page = ScriptedPage {
            html: r#"<ul><li data-index="1"><a href="/job-offer/a-1">x</a></li></ul>"#.into(),
            ..ScriptedPage::default()
        };
        page.present.insert(selectors.listing_item);
        page.present.insert(selectors.first_link);

        let result = collector.run(&mut page).await;

        assert!(matches!(result, Err(CollectError::Persistence(_))));
        let navigations = page
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Navigate(_)))
            .count();
        assert_eq!(navigations, 1);
    }
}
