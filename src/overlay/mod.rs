//! Detection and neutralization of surfaces blocking the result list
//!
//! Resolution order for each pass:
//!
//! 1. a cookie banner is accepted by click when `ALLOW_COOKIE_CLICK` is set;
//! 2. otherwise, and for any remaining dialog, `Escape` is dispatched;
//! 3. `overflow: hidden` on the document body is lifted;
//! 4. the scroll target gets keyboard focus back.
//!
//! A fixed element covering the list gets one `Escape`; if it is still there
//! afterwards it is reported and left alone. Any step that fails is logged and
//! skipped; mitigation never ends a session.

use tracing::{debug, info, warn};

use crate::error::DriverError;
use crate::models::{OverlayAction, OverlayEvent, OverlayKind};
use crate::retry::{RetryPolicy, retry_transient};
use crate::traits::{PageDriver, SiteSelectors};

const DISMISS_KEY: &str = "Escape";

pub struct OverlayMitigator {
    dialog: String,
    cookie_banner: String,
    cookie_accept: String,
    scroll_target: String,
    allow_cookie_click: bool,
    retry: RetryPolicy,
}

impl OverlayMitigator {
    pub fn new(selectors: &SiteSelectors, allow_cookie_click: bool, retry: RetryPolicy) -> Self {
        Self {
            dialog: selectors.dialog.clone(),
            cookie_banner: selectors.cookie_banner.clone(),
            cookie_accept: selectors.cookie_accept.clone(),
            scroll_target: selectors.scroll_target.clone(),
            allow_cookie_click,
            retry,
        }
    }

    /// Inspect the page and clear whatever blocks scrolling.
    ///
    /// Returns the overlays found and the action taken on each. An empty result
    /// with no scroll lock lifted means the page was left untouched.
    pub async fn mitigate(&self, driver: &mut dyn PageDriver) -> Vec<OverlayEvent> {
        let mut events = Vec::new();

        if self.is_shown(driver, &self.cookie_banner).await {
            let action = self.resolve_cookie_banner(driver).await;
            events.push(OverlayEvent {
                kind: OverlayKind::CookieBanner,
                action_taken: action,
            });
        }

        if self.is_shown(driver, &self.dialog).await {
            let action = if self.dismiss(driver).await {
                OverlayAction::Dismissed
            } else {
                OverlayAction::Ignored
            };
            events.push(OverlayEvent {
                kind: OverlayKind::Modal,
                action_taken: action,
            });
        }

        if self.covered(driver).await {
            let action = if self.dismiss(driver).await && !self.covered(driver).await {
                OverlayAction::Dismissed
            } else {
                OverlayAction::Ignored
            };
            events.push(OverlayEvent {
                kind: OverlayKind::FixedHeader,
                action_taken: action,
            });
        }

        let unlocked = match driver.restore_scroll().await {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Could not restore body scrolling: {}", e);
                false
            }
        };

        if !events.is_empty() || unlocked {
            self.refocus(driver).await;
        }

        for event in &events {
            info!(kind = ?event.kind, action = ?event.action_taken, "Overlay handled");
        }
        if unlocked {
            info!("Re-enabled body scrolling");
        }

        events
    }

    async fn resolve_cookie_banner(&self, driver: &mut dyn PageDriver) -> OverlayAction {
        if self.allow_cookie_click {
            match retry_transient!(self.retry, "accept cookies", driver.click(&self.cookie_accept)) {
                Ok(()) => return OverlayAction::Clicked,
                Err(e) => warn!("Cookie accept click failed, falling back to dismiss: {}", e),
            }
        }

        if self.dismiss(driver).await {
            OverlayAction::Dismissed
        } else {
            OverlayAction::Ignored
        }
    }

    async fn dismiss(&self, driver: &mut dyn PageDriver) -> bool {
        match retry_transient!(self.retry, "dismiss overlay", driver.dispatch_key(DISMISS_KEY)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dismiss key failed: {}", e);
                false
            }
        }
    }

    async fn refocus(&self, driver: &mut dyn PageDriver) {
        let result: Result<(), DriverError> =
            retry_transient!(self.retry, "refocus scroll target", driver.focus(&self.scroll_target));
        if let Err(e) = result {
            warn!("Could not refocus scroll target: {}", e);
        }
    }

    /// Whether a fixed element sits on top of the scroll target
    async fn covered(&self, driver: &mut dyn PageDriver) -> bool {
        match driver.fixed_overlay_over(&self.scroll_target).await {
            Ok(covered) => covered,
            Err(e) => {
                debug!("Fixed overlay check failed: {}", e);
                false
            }
        }
    }

    async fn is_shown(&self, driver: &mut dyn PageDriver, selector: &str) -> bool {
        match driver.exists(selector).await {
            Ok(found) => found,
            Err(e) => {
                debug!("Overlay check for {} failed: {}", selector, e);
                false
            }
        }
    }
}
