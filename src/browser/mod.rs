//! Live browser backend for the page driver
//!
//! The discovery loop only talks to [`PageDriver`](crate::traits::PageDriver);
//! this module provides the Chromium implementation used in production.

pub mod chromium;

pub use chromium::{ChromiumBrowser, ChromiumPage};
