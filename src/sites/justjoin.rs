//! justjoin.it search profile

use crate::traits::{SearchSite, SiteProfile, SiteSelectors};

pub const DEFAULT_BASE_URL: &str = "https://justjoin.it/";

/// Search profile for justjoin.it offer listings
#[derive(Debug, Clone)]
pub struct JustJoin {
    profile: SiteProfile,
}

impl JustJoin {
    /// Create a profile rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let profile = SiteProfile {
            name: "justjoin.it".to_string(),
            base_url: base_url.into(),
            search_path_pattern: "/job-offers/{location}".to_string(),
            keyword_param: "keyword".to_string(),
            id_prefix: "jj-".to_string(),
            selectors: SiteSelectors {
                listing_item: "ul > li[data-index]".to_string(),
                listing_link: "a[href]".to_string(),
                index_attribute: "data-index".to_string(),
                first_link: "ul > li[data-index] a[href]".to_string(),
                scroll_target: "ul:has(> li[data-index])".to_string(),
                dialog: "[role='dialog'], [aria-modal='true'], dialog[open]".to_string(),
                cookie_banner: "#cookiescript_injected, [id*='cookie-consent'], [aria-label*='cookie' i]"
                    .to_string(),
                cookie_accept: "#cookiescript_accept, [id*='cookie-consent'] button[id*='accept']"
                    .to_string(),
                load_more: "button[data-testid='load-more'], button[aria-label*='load more' i]"
                    .to_string(),
            },
        };

        Self { profile }
    }
}

impl Default for JustJoin {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl SearchSite for JustJoin {
    fn profile(&self) -> &SiteProfile {
        &self.profile
    }
}
