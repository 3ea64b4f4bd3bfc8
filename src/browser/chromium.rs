//! Chromium page driver built on chromiumoxide

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::DriverError;
use crate::session::StoredCookie;
use crate::traits::PageDriver;

/// Environment variable pointing at a Chromium binary
pub const CHROMIUM_PATH_ENV: &str = "CHROMIUM_PATH";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A launched Chromium process and its CDP event loop
pub struct ChromiumBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    /// Launch Chromium, visible when `headful` is set.
    ///
    /// A `user_data_dir` keeps cookies and consent choices between runs.
    pub async fn launch(headful: bool, user_data_dir: Option<&Path>) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--lang=pl-PL");

        if headful {
            builder = builder.with_head();
        }
        if let Some(dir) = user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if let Some(path) = std::env::var_os(CHROMIUM_PATH_ENV) {
            builder = builder.chrome_executable(path);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        info!("Chromium launched (headful: {})", headful);
        Ok(Self { browser, handler })
    }

    /// Open a blank tab whose scroll input goes to `scroll_target`
    pub async fn new_page(&self, scroll_target: &str) -> Result<ChromiumPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to open a browser tab")?;

        Ok(ChromiumPage {
            page,
            scroll_target: scroll_target.to_string(),
        })
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await.context("Failed to close Chromium")?;
        match self.browser.wait().await {
            Ok(status) => debug!("Chromium exited with {:?}", status),
            Err(e) => debug!("Could not reap the Chromium process: {}", e),
        }
        self.handler.abort();
        Ok(())
    }
}

/// One browser tab driven through the Chrome DevTools Protocol
pub struct ChromiumPage {
    page: Page,
    scroll_target: String,
}

impl ChromiumPage {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, DriverError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?
            .into_value()
            .map_err(|e| DriverError::Script(format!("unexpected script result: {}", e)))
    }

    /// Expression resolving to the element that actually scrolls
    fn scroller(&self) -> String {
        format!(
            "(() => {{ const t = document.querySelector({}); \
             return (t && t.scrollHeight > t.clientHeight + 1) ? t \
             : (document.scrollingElement || document.documentElement); }})()",
            js_string(&self.scroll_target)
        )
    }

    async fn key_event(&self, kind: DispatchKeyEventType, key: &str) -> Result<(), DriverError> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key.to_string())
            .code(key.to_string());
        if let Some(code) = virtual_key_code(key) {
            builder = builder
                .windows_virtual_key_code(code)
                .native_virtual_key_code(code);
        }
        let params = builder.build().map_err(DriverError::Browser)?;

        self.page
            .execute(params)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Browser(e.to_string()))
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        let load = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<(), CdpError>(())
        };

        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DriverError::Navigation(e.to_string())),
            Err(_) => Err(DriverError::Timeout {
                what: format!("navigation to {}", url),
                after: timeout,
            }),
        }
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.exists(selector).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: selector.to_string(),
                    after: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        self.page
            .url()
            .await
            .map_err(|e| DriverError::Browser(e.to_string()))?
            .ok_or_else(|| DriverError::Browser("page has no URL".to_string()))
    }

    async fn html(&mut self) -> Result<String, DriverError> {
        self.eval("document.documentElement.outerHTML".to_string()).await
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError> {
        self.eval(format!("document.querySelector({}) !== null", js_string(selector)))
            .await
    }

    async fn read_attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| element_error(selector, e))?;
        element
            .attribute(name)
            .await
            .map_err(|e| element_error(selector, e))
    }

    async fn scroll_by(&mut self, dy: i64) -> Result<bool, DriverError> {
        self.eval(format!(
            "(() => {{ const s = {}; const before = s.scrollTop; \
             s.scrollBy(0, {}); return s.scrollTop !== before; }})()",
            self.scroller(),
            dy
        ))
        .await
    }

    async fn at_bottom(&mut self) -> Result<bool, DriverError> {
        self.eval(format!(
            "(() => {{ const s = {}; \
             return s.scrollTop + s.clientHeight >= s.scrollHeight - 2; }})()",
            self.scroller()
        ))
        .await
    }

    async fn dispatch_key(&mut self, key: &str) -> Result<(), DriverError> {
        self.key_event(DispatchKeyEventType::KeyDown, key).await?;
        self.key_event(DispatchKeyEventType::KeyUp, key).await
    }

    async fn hover(&mut self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| element_error(selector, e))?;
        element.hover().await.map_err(|e| element_error(selector, e))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| element_error(selector, e))?;
        element.click().await.map_err(|e| element_error(selector, e))?;
        Ok(())
    }

    async fn focus(&mut self, selector: &str) -> Result<(), DriverError> {
        let focused: bool = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; \
                 if (!el.hasAttribute('tabindex')) el.setAttribute('tabindex', '-1'); \
                 el.focus({{ preventScroll: true }}); return true; }})()",
                js_string(selector)
            ))
            .await?;

        if focused {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }

    async fn fixed_overlay_over(&mut self, selector: &str) -> Result<bool, DriverError> {
        self.eval(format!(
            "(() => {{ const t = document.querySelector({}); if (!t) return false; \
             const b = t.getBoundingClientRect(); \
             return Array.from(document.querySelectorAll('body *')).some(el => {{ \
               if (el === t || el.contains(t) || t.contains(el)) return false; \
               const st = getComputedStyle(el); \
               if (st.position !== 'fixed' || st.display === 'none' || st.visibility === 'hidden') return false; \
               const r = el.getBoundingClientRect(); \
               return r.width > 0 && r.height > 0 && r.left < b.right && r.right > b.left \
                 && r.top < b.bottom && r.bottom > b.top; }}); }})()",
            js_string(selector)
        ))
        .await
    }

    async fn restore_scroll(&mut self) -> Result<bool, DriverError> {
        self.eval(
            "(() => { let changed = false; \
             for (const el of [document.documentElement, document.body]) { \
               if (el && getComputedStyle(el).overflow === 'hidden') { \
                 el.style.overflow = 'auto'; changed = true; } } \
             return changed; })()"
                .to_string(),
        )
        .await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| DriverError::Browser(e.to_string()))
    }

    async fn set_cookies(&mut self, cookies: &[StoredCookie]) -> Result<(), DriverError> {
        let params = cookies
            .iter()
            .map(cookie_param)
            .collect::<Result<Vec<_>, _>>()?;
        if params.is_empty() {
            return Ok(());
        }

        self.page
            .set_cookies(params)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Browser(e.to_string()))
    }

    async fn cookies(&mut self) -> Result<Vec<StoredCookie>, DriverError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| DriverError::Browser(e.to_string()))?;

        Ok(cookies.into_iter().map(stored_cookie).collect())
    }
}

fn cookie_param(cookie: &StoredCookie) -> Result<CookieParam, DriverError> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only);

    // Session cookies carry no expiry
    if cookie.expires > 0.0 {
        builder = builder.expires(TimeSinceEpoch::new(cookie.expires));
    }
    let same_site = match cookie.same_site.as_deref() {
        Some("Strict") => Some(CookieSameSite::Strict),
        Some("Lax") => Some(CookieSameSite::Lax),
        Some("None") => Some(CookieSameSite::None),
        _ => None,
    };
    if let Some(same_site) = same_site {
        builder = builder.same_site(same_site);
    }

    builder.build().map_err(DriverError::Browser)
}

fn stored_cookie(cookie: Cookie) -> StoredCookie {
    let same_site = cookie.same_site.map(|same_site| {
        match same_site {
            CookieSameSite::Strict => "Strict",
            CookieSameSite::Lax => "Lax",
            CookieSameSite::None => "None",
        }
        .to_string()
    });

    StoredCookie {
        name: cookie.name,
        value: cookie.value,
        domain: cookie.domain,
        path: cookie.path,
        expires: if cookie.session { -1.0 } else { cookie.expires },
        http_only: cookie.http_only,
        secure: cookie.secure,
        same_site,
    }
}

/// JSON string literal, valid as a JS string expression
fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn virtual_key_code(key: &str) -> Option<i64> {
    match key {
        "Escape" => Some(27),
        "PageDown" => Some(34),
        "End" => Some(35),
        "ArrowDown" => Some(40),
        "Space" => Some(32),
        _ => None,
    }
}

/// Map CDP failures on an element to the driver's retry classes
fn element_error(selector: &str, err: CdpError) -> DriverError {
    let message = err.to_string();
    let lower = message.to_lowercase();

    if lower.contains("detached") || lower.contains("no node with given id") {
        DriverError::Detached(selector.to_string())
    } else if lower.contains("not found") || lower.contains("could not find node") {
        DriverError::ElementNotFound(selector.to_string())
    } else if lower.contains("box model") || lower.contains("not clickable") {
        DriverError::Intercepted(selector.to_string())
    } else {
        DriverError::Browser(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(
            js_string("button[aria-label*='load more' i]"),
            r#""button[aria-label*='load more' i]""#
        );
        assert_eq!(js_string(r#"a[href="x"]"#), r#""a[href=\"x\"]""#);
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_scrolls_and_reads_list() {
        let browser = ChromiumBrowser::launch(false, None)
            .await
            .expect("failed to launch Chromium");
        let mut page = browser
            .new_page("ul")
            .await
            .expect("failed to open page");

        let items: String = (0..200)
            .map(|i| format!("<li data-index=\"{i}\"><a href=\"/offer/{i}\">{i}</a></li>"))
            .collect();
        let url = format!("data:text/html,<ul style=\"height:300px;overflow:auto\">{items}</ul>");
        page.navigate(&url, Duration::from_secs(10))
            .await
            .expect("navigation failed");

        assert!(page.exists("li[data-index]").await.unwrap());
        assert!(!page.at_bottom().await.unwrap());
        assert!(page.scroll_by(100).await.unwrap());
        assert!(page.html().await.unwrap().contains("data-index=\"199\""));

        browser.close().await.expect("close failed");
    }
}
