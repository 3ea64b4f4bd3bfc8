//! Scripted page driver for unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::session::StoredCookie;
use crate::traits::PageDriver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Navigate(String),
    Hover(String),
    Click(String),
    Key(String),
    Focus(String),
    Scroll(i64),
    RestoreScroll,
}

/// In-memory page whose behaviour is set up field by field
#[derive(Default)]
pub struct ScriptedPage {
    pub url: String,
    pub html: String,
    /// Selectors that currently match something
    pub present: HashSet<String>,
    /// Selectors removed from `present` when Escape is pressed
    pub escape_removes: Vec<String>,
    /// Selectors removed from `present` when clicked: (clicked, removed)
    pub click_removes: Vec<(String, String)>,
    /// Scroll steps left before the bottom edge
    pub steps_to_bottom: Option<u32>,
    /// Wheel steps report no movement
    pub wheel_stuck: bool,
    pub fixed_overlay: bool,
    /// The fixed overlay closes on Escape
    pub escape_clears_overlay: bool,
    pub body_locked: bool,
    /// Cookie jar of the browser context
    pub cookies: Vec<StoredCookie>,
    /// Errors returned by the next calls of an operation, by operation name
    pub failures: HashMap<&'static str, VecDeque<DriverError>>,
    pub calls: Vec<Call>,
}

impl ScriptedPage {
    pub fn fail_next(&mut self, op: &'static str, error: DriverError) {
        self.failures.entry(op).or_default().push_back(error);
    }

    pub fn clicks(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Click(selector) => Some(selector.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Key(key) => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }

    fn injected(&mut self, op: &'static str) -> Result<(), DriverError> {
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn require(&self, selector: &str) -> Result<(), DriverError> {
        if self.present.contains(selector) {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.injected("navigate")?;
        self.calls.push(Call::Navigate(url.to_string()));
        self.url = url.to_string();
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        self.injected("wait_for_selector")?;
        if self.present.contains(selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                what: selector.to_string(),
                after: timeout,
            })
        }
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        self.injected("current_url")?;
        Ok(self.url.clone())
    }

    async fn html(&mut self) -> Result<String, DriverError> {
        self.injected("html")?;
        Ok(self.html.clone())
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError> {
        self.injected("exists")?;
        Ok(self.present.contains(selector))
    }

    async fn read_attribute(&mut self, selector: &str, _name: &str) -> Result<Option<String>, DriverError> {
        self.injected("read_attribute")?;
        self.require(selector)?;
        Ok(None)
    }

    async fn scroll_by(&mut self, dy: i64) -> Result<bool, DriverError> {
        self.injected("scroll_by")?;
        self.calls.push(Call::Scroll(dy));
        if self.wheel_stuck {
            return Ok(false);
        }
        match self.steps_to_bottom.as_mut() {
            Some(0) => Ok(false),
            Some(left) => {
                *left -= 1;
                Ok(true)
            }
            None => Ok(true),
        }
    }

    async fn at_bottom(&mut self) -> Result<bool, DriverError> {
        self.injected("at_bottom")?;
        Ok(self.steps_to_bottom == Some(0))
    }

    async fn dispatch_key(&mut self, key: &str) -> Result<(), DriverError> {
        self.injected("dispatch_key")?;
        self.calls.push(Call::Key(key.to_string()));
        if key == "Escape" {
            for selector in &self.escape_removes {
                self.present.remove(selector);
            }
            if self.escape_clears_overlay {
                self.fixed_overlay = false;
            }
        }
        Ok(())
    }

    async fn hover(&mut self, selector: &str) -> Result<(), DriverError> {
        self.injected("hover")?;
        self.require(selector)?;
        self.calls.push(Call::Hover(selector.to_string()));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        self.injected("click")?;
        self.require(selector)?;
        self.calls.push(Call::Click(selector.to_string()));
        let removed: Vec<String> = self
            .click_removes
            .iter()
            .filter(|(clicked, _)| clicked == selector)
            .map(|(_, removed)| removed.clone())
            .collect();
        for selector in removed {
            self.present.remove(&selector);
        }
        Ok(())
    }

    async fn focus(&mut self, selector: &str) -> Result<(), DriverError> {
        self.injected("focus")?;
        self.calls.push(Call::Focus(selector.to_string()));
        Ok(())
    }

    async fn fixed_overlay_over(&mut self, _selector: &str) -> Result<bool, DriverError> {
        self.injected("fixed_overlay_over")?;
        Ok(self.fixed_overlay)
    }

    async fn restore_scroll(&mut self) -> Result<bool, DriverError> {
        self.injected("restore_scroll")?;
        self.calls.push(Call::RestoreScroll);
        Ok(std::mem::take(&mut self.body_locked))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError> {
        self.injected("screenshot")?;
        Ok(b"\x89PNG".to_vec())
    }

    async fn set_cookies(&mut self, cookies: &[StoredCookie]) -> Result<(), DriverError> {
        self.injected("set_cookies")?;
        self.cookies.extend_from_slice(cookies);
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<StoredCookie>, DriverError> {
        self.injected("cookies")?;
        Ok(self.cookies.clone())
    }
}
