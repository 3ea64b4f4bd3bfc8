//! Traits and interfaces for site-agnostic link discovery

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::models::SearchTuple;
use crate::session::StoredCookie;

/// Static description of a listing site
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Display name for the website
    pub name: String,
    /// Base URL for the website
    pub base_url: String,
    /// Search path pattern with a {location} placeholder
    pub search_path_pattern: String,
    /// Query parameter carrying the job name
    pub keyword_param: String,
    /// Short source prefix for record ids
    pub id_prefix: String,
    /// CSS selectors for the listing and its obstructions
    pub selectors: SiteSelectors,
}

/// CSS selectors for the parts of a search results page the engine touches
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    /// One rendered listing card carrying the numeric index attribute
    pub listing_item: String,
    /// Anchor inside a listing card
    pub listing_link: String,
    /// Attribute on `listing_item` holding the site's numeric index
    pub index_attribute: String,
    /// First anchor of the list, hovered to wake lazy loading
    pub first_link: String,
    /// Element receiving focus and scroll input
    pub scroll_target: String,
    /// Modal or dialog surfaces
    pub dialog: String,
    /// Cookie consent banner
    pub cookie_banner: String,
    /// Accept button inside the cookie banner
    pub cookie_accept: String,
    /// Pagination / "load more" control
    pub load_more: String,
}

/// A listing site the collector knows how to search
pub trait SearchSite: Send + Sync {
    /// Get the profile for this site
    fn profile(&self) -> &SiteProfile;

    /// Build the canonical search URL for a tuple
    ///
    /// # Arguments
    /// * `tuple` - The job name and location to search for
    ///
    /// # Returns
    /// * `String` - The complete search URL
    fn build_search_url(&self, tuple: &SearchTuple) -> String {
        let profile = self.profile();
        let base = profile.base_url.trim_end_matches('/');
        let path = profile
            .search_path_pattern
            .replace("{location}", tuple.location.trim_matches('/'));
        let keyword = urlencoding::encode(&tuple.job_name);
        format!("{base}{path}?{}={keyword}", profile.keyword_param)
    }
}

/// The rendering capability the discovery loop drives.
///
/// Implementations wrap a live browser page; tests use a scripted fake. Every
/// method may fail with a [`DriverError`], transient variants of which callers
/// retry within their policy budget. Elements are addressed by selector on each
/// call, so a swapped DOM node is re-acquired on the next call.
#[async_trait]
pub trait PageDriver: Send {
    /// Navigate to `url`, waiting at most `timeout` for the document to load
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Wait until an element matching `selector` is present
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// URL of the current document
    async fn current_url(&mut self) -> Result<String, DriverError>;

    /// Outer HTML snapshot of the current document
    async fn html(&mut self) -> Result<String, DriverError>;

    /// Whether any element matches `selector`
    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError>;

    /// Read attribute `name` of the first element matching `selector`
    async fn read_attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, DriverError>;

    /// Scroll the document by `dy` pixels, returning whether the viewport moved
    async fn scroll_by(&mut self, dy: i64) -> Result<bool, DriverError>;

    /// Whether the document is scrolled to its bottom edge
    async fn at_bottom(&mut self) -> Result<bool, DriverError>;

    /// Press and release a key (e.g. "Escape", "ArrowDown")
    async fn dispatch_key(&mut self, key: &str) -> Result<(), DriverError>;

    /// Move the pointer over the first element matching `selector`
    async fn hover(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Click the first element matching `selector`
    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Give keyboard focus to the first element matching `selector`
    async fn focus(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Whether a fixed-position element overlaps the bounding box of `selector`
    async fn fixed_overlay_over(&mut self, selector: &str) -> Result<bool, DriverError>;

    /// Remove `overflow: hidden` from the document body, returning whether it was set
    async fn restore_scroll(&mut self) -> Result<bool, DriverError>;

    /// PNG screenshot of the full page
    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError>;

    /// Install cookies into the browser context
    async fn set_cookies(&mut self, cookies: &[StoredCookie]) -> Result<(), DriverError>;

    /// Cookies the browser context currently holds
    async fn cookies(&mut self) -> Result<Vec<StoredCookie>, DriverError>;
}
