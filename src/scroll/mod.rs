//! Human-paced, click-free scrolling of an infinite result list

mod pacing;

pub use pacing::{Jitter, Pacing};

use tracing::{debug, info, warn};

use crate::error::DriverError;
use crate::retry::{RetryPolicy, retry_transient};
use crate::traits::{PageDriver, SiteSelectors};

/// Key used when a wheel step does not move the viewport
const FALLBACK_KEY: &str = "ArrowDown";

/// What a single scroll batch achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Steps that moved the viewport
    pub steps_moved: u32,
    /// Steps that fell back to a keyboard press
    pub key_fallbacks: u32,
    /// The list was at its bottom edge when the batch ended
    pub reached_bottom: bool,
    pub load_more_clicked: bool,
}

#[derive(Debug, Clone)]
pub struct ScrollSettings {
    pub batch_steps: u32,
    pub step_px: i64,
    pub pacing: Pacing,
    pub allow_load_more_click: bool,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            batch_steps: 10,
            step_px: 100,
            pacing: Pacing::default(),
            allow_load_more_click: false,
        }
    }
}

/// Drives the viewport down the result list without clicking listing cards.
///
/// The driver keeps no element handles: every gesture looks its target up by
/// selector, so a node swapped out by the page is picked up again on the next
/// call. A stale node surfaces as a transient error and is retried.
pub struct ScrollDriver {
    settings: ScrollSettings,
    first_link: String,
    load_more: String,
    retry: RetryPolicy,
}

impl ScrollDriver {
    pub fn new(settings: ScrollSettings, selectors: &SiteSelectors, retry: RetryPolicy) -> Self {
        Self {
            settings,
            first_link: selectors.first_link.clone(),
            load_more: selectors.load_more.clone(),
            retry,
        }
    }

    /// Hover the first listing to wake lazy loading.
    ///
    /// Returns `false` when no listing could be hovered; the session can still
    /// proceed, the list may simply populate on scroll.
    pub async fn wake(&self, driver: &mut dyn PageDriver) -> bool {
        match retry_transient!(self.retry, "hover first listing", driver.hover(&self.first_link)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not hover first listing: {}", e);
                false
            }
        }
    }

    /// Run one batch of scroll steps followed by the settle pause.
    ///
    /// Calling this on a list already at its bottom does nothing but settle, which
    /// the caller observes as a batch without growth.
    pub async fn run_batch(&self, driver: &mut dyn PageDriver) -> Result<BatchOutcome, DriverError> {
        let mut outcome = BatchOutcome::default();

        for step in 0..self.settings.batch_steps {
            if retry_transient!(self.retry, "check list bottom", driver.at_bottom())? {
                debug!("List bottom reached after {} steps", step);
                outcome.reached_bottom = true;
                break;
            }

            let moved = retry_transient!(
                self.retry,
                "scroll step",
                driver.scroll_by(self.settings.step_px)
            )?;

            if moved {
                outcome.steps_moved += 1;
            } else {
                retry_transient!(self.retry, "keyboard scroll", driver.dispatch_key(FALLBACK_KEY))?;
                outcome.key_fallbacks += 1;
            }

            self.settings.pacing.step_pause.pause().await;
        }

        if !outcome.reached_bottom {
            outcome.reached_bottom = retry_transient!(self.retry, "check list bottom", driver.at_bottom())?;
        }

        if outcome.reached_bottom {
            outcome.load_more_clicked = self.try_load_more(driver).await;
        }

        self.settings.pacing.settle.pause().await;
        Ok(outcome)
    }

    /// Click the pagination control, only when explicitly allowed
    async fn try_load_more(&self, driver: &mut dyn PageDriver) -> bool {
        if !self.settings.allow_load_more_click {
            return false;
        }

        match driver.exists(&self.load_more).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!("Could not look for a load-more control: {}", e);
                return false;
            }
        }

        match retry_transient!(self.retry, "click load more", driver.click(&self.load_more)) {
            Ok(()) => {
                info!("Clicked load-more control");
                true
            }
            Err(e) => {
                warn!("Load-more click failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::JustJoin;
    use crate::testing::{Call, ScriptedPage};
    use crate::traits::SearchSite;

    fn driver(allow_load_more_click: bool) -> ScrollDriver {
        let settings = ScrollSettings {
            pacing: Pacing::immediate(),
            allow_load_more_click,
            ..ScrollSettings::default()
        };
        ScrollDriver::new(
            settings,
            &JustJoin::default().profile().selectors,
            RetryPolicy::new(3, std::time::Duration::ZERO),
        )
    }

    fn selectors() -> SiteSelectors {
        JustJoin::default().profile().selectors.clone()
    }

    #[tokio::test]
    async fn test_batch_scrolls_fixed_number_of_steps() {
        let mut page = ScriptedPage::default();

        let outcome = driver(false).run_batch(&mut page).await.unwrap();

        assert_eq!(outcome.steps_moved, 10);
        assert!(!outcome.reached_bottom);
        assert_eq!(page.calls.iter().filter(|c| matches!(c, Call::Scroll(100))).count(), 10);
    }

    #[tokio::test]
    async fn test_batch_at_bottom_is_a_no_op() {
        let mut page = ScriptedPage {
            steps_to_bottom: Some(0),
            ..ScriptedPage::default()
        };

        let outcome = driver(false).run_batch(&mut page).await.unwrap();

        assert_eq!(outcome.steps_moved, 0);
        assert!(outcome.reached_bottom);
        assert!(page.calls.is_empty());
    }

    #[tokio::test]
    async fn test_stuck_wheel_falls_back_to_keyboard() {
        let mut page = ScriptedPage {
            wheel_stuck: true,
            ..ScriptedPage::default()
        };

        let outcome = driver(false).run_batch(&mut page).await.unwrap();

        assert_eq!(outcome.steps_moved, 0);
        assert_eq!(outcome.key_fallbacks, 10);
        assert!(page.keys().iter().all(|key| *key == "ArrowDown"));
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_load_more_is_never_clicked_when_disallowed() {
        let load_more = selectors().load_more;
        let mut page = ScriptedPage {
            steps_to_bottom: Some(3),
            ..ScriptedPage::default()
        };
        page.present.insert(load_more);

        let outcome = driver(false).run_batch(&mut page).await.unwrap();

        assert!(outcome.reached_bottom);
        assert!(!outcome.load_more_clicked);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_load_more_clicked_at_bottom_when_allowed() {
        let load_more = selectors().load_more;
        let mut page = ScriptedPage {
            steps_to_bottom: Some(3),
            ..ScriptedPage::default()
        };
        page.present.insert(load_more.clone());

        let outcome = driver(true).run_batch(&mut page).await.unwrap();

        assert!(outcome.load_more_clicked);
        assert_eq!(page.clicks(), vec![load_more.as_str()]);
    }

    #[tokio::test]
    async fn test_detached_target_is_reacquired() {
        let mut page = ScriptedPage::default();
        page.fail_next("scroll_by", DriverError::Detached("ul".into()));
        page.fail_next("scroll_by", DriverError::Detached("ul".into()));

        let outcome = driver(false).run_batch(&mut page).await.unwrap();

        assert_eq!(outcome.steps_moved, 10);
    }

    #[tokio::test]
    async fn test_persistent_failure_surfaces_after_budget() {
        let mut page = ScriptedPage::default();
        for _ in 0..3 {
            page.fail_next("scroll_by", DriverError::Detached("ul".into()));
        }

        let result = driver(false).run_batch(&mut page).await;

        assert!(matches!(result, Err(DriverError::Detached(_))));
    }

    #[tokio::test]
    async fn test_wake_hovers_first_listing() {
        let first = selectors().first_link;
        let mut page = ScriptedPage::default();
        assert!(!driver(false).wake(&mut page).await);

        page.present.insert(first.clone());
        assert!(driver(false).wake(&mut page).await);
        assert_eq!(page.calls, vec![Call::Hover(first)]);
    }
}
