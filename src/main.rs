use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use job_link_collector::browser::{ChromiumBrowser, ChromiumPage};
use job_link_collector::diagnostics::Diagnostics;
use job_link_collector::sites::JustJoin;
use job_link_collector::traits::SearchSite;
use job_link_collector::{
    CollectError, Config, DataPaths, DedupeStore, LinkCollector, SessionState,
};

/// The collector together with the browser tab it drives
struct CollectorTask {
    collector: LinkCollector,
    page: ChromiumPage,
}

impl CollectorTask {
    async fn run(&mut self) -> Result<()> {
        let summary = self.collector.run(&mut self.page).await?;

        for tuple in &summary.tuples {
            info!(
                "{} | {}: {} new links, {} known",
                tuple.job_name, tuple.location, tuple.added, tuple.total_known
            );
        }
        if summary.failed_tuples() > 0 {
            warn!("{} searches failed this run", summary.failed_tuples());
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting justjoin.it link collector");

    let mut config = Config::load().context("Failed to load configuration")?;
    let paths = DataPaths::new(&config.data_dir);
    paths
        .ensure()
        .with_context(|| format!("Failed to create data directory {}", paths.root.display()))?;
    config.resolve_base_url(&paths);
    let config = Arc::new(config);

    let cancel = CancellationToken::new();
    watch_for_shutdown(cancel.clone(), config.run_timeout());

    let site = Arc::new(JustJoin::new(config.base_url()));
    let store = DedupeStore::open(paths.links())?;
    let diagnostics = Diagnostics::new(paths.errors(), paths.screenshots());

    let browser = ChromiumBrowser::launch(config.headful, config.user_data_dir.as_deref()).await?;
    let page = browser
        .new_page(&site.profile().selectors.scroll_target)
        .await?;
    let collector = LinkCollector::new(config.clone(), site, store, diagnostics, cancel.clone())?
        .with_session_state(SessionState::new(paths.storage_state()));
    let task = Arc::new(Mutex::new(CollectorTask { collector, page }));

    // Run once immediately
    let first_run = task.lock().await.run().await;
    if let Err(e) = &first_run {
        error!("Error during initial run: {:#}", e);
    }

    let mut schedule = config.schedule.as_deref().filter(|_| !cancel.is_cancelled());
    if schedule.is_some() && first_run.as_ref().is_err_and(is_fatal) {
        warn!("Not scheduling further runs, the link log cannot be written");
        schedule = None;
    }
    if let Some(schedule) = schedule {
        let mut sched = JobScheduler::new().await?;

        let job_task = task.clone();
        let job_cancel = cancel.clone();
        sched
            .add(Job::new_async(schedule, move |_uuid, _l| {
                let task = job_task.clone();
                let cancel = job_cancel.clone();
                Box::pin(async move {
                    if let Err(e) = task.lock().await.run().await {
                        error!("Error during scheduled run: {:#}", e);
                        if is_fatal(&e) {
                            cancel.cancel();
                        }
                    }
                })
            })?)
            .await?;

        info!("Scheduler started with schedule {}", schedule);
        sched.start().await?;

        cancel.cancelled().await;
        info!("Stopping scheduler");
        sched.shutdown().await?;
    }

    // Wait for an in-flight scheduled run before closing the browser
    drop(task.lock().await);
    if let Err(e) = browser.close().await {
        warn!("Browser did not shut down cleanly: {:#}", e);
    }

    first_run
}

/// Whether the link log can no longer be written and later runs must not start
fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CollectError>().is_some_and(CollectError::is_fatal)
}

/// Cancel the run on Ctrl-C or once the optional run timeout elapses
fn watch_for_shutdown(cancel: CancellationToken, run_timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match run_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Ctrl-C received, finishing the current batch"),
                Err(e) => {
                    warn!("Could not listen for Ctrl-C: {}", e);
                    return;
                }
            },
            _ = deadline => info!("Run timeout reached, cancelling"),
        }

        cancel.cancel();
    });
}
