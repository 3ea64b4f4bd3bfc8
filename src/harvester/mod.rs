//! Extraction of listing links from a rendered results page

use std::collections::HashMap;

use anyhow::Result;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::DriverError;
use crate::models::{LinkRecord, SearchTuple};
use crate::retry::{RetryPolicy, retry_transient};
use crate::traits::{PageDriver, SiteProfile};

/// Records visible in one DOM snapshot, unique by URL
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Harvest {
    pub records: Vec<LinkRecord>,
    /// Listing cards skipped for a missing href or a non-numeric index
    pub anomalies: usize,
}

impl Harvest {
    fn upsert(&mut self, positions: &mut HashMap<String, usize>, record: LinkRecord) {
        match positions.get(&record.url) {
            Some(&pos) => self.records[pos] = record,
            None => {
                positions.insert(record.url.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }
}

pub struct LinkHarvester {
    item_selector: Selector,
    link_selector: Selector,
    index_attribute: String,
    id_prefix: String,
    retry: RetryPolicy,
}

impl LinkHarvester {
    pub fn new(profile: &SiteProfile, retry: RetryPolicy) -> Result<Self> {
        let item_selector = Selector::parse(&profile.selectors.listing_item)
            .map_err(|e| anyhow::anyhow!("Failed to parse listing item selector: {:?}", e))?;
        let link_selector = Selector::parse(&profile.selectors.listing_link)
            .map_err(|e| anyhow::anyhow!("Failed to parse listing link selector: {:?}", e))?;

        Ok(Self {
            item_selector,
            link_selector,
            index_attribute: profile.selectors.index_attribute.clone(),
            id_prefix: profile.id_prefix.clone(),
            retry,
        })
    }

    /// Snapshot the page and extract the listings currently rendered
    pub async fn read(&self, driver: &mut dyn PageDriver, tuple: &SearchTuple) -> Result<Harvest, DriverError> {
        let page_url = retry_transient!(self.retry, "read page url", driver.current_url())?;
        let html = retry_transient!(self.retry, "read page html", driver.html())?;

        let base = Url::parse(&page_url)
            .map_err(|e| DriverError::Script(format!("page reported invalid url {page_url:?}: {e}")))?;

        Ok(self.extract(&html, &base, tuple))
    }

    /// Extract listing records from an HTML snapshot.
    ///
    /// Relative hrefs are resolved against `base` and fragments dropped. A URL
    /// rendered twice keeps its first position but takes the later card's data.
    pub fn extract(&self, html: &str, base: &Url, tuple: &SearchTuple) -> Harvest {
        let document = Html::parse_document(html);
        let mut harvest = Harvest::default();
        let mut positions = HashMap::new();

        for item in document.select(&self.item_selector) {
            let Some(data_index) = item
                .value()
                .attr(&self.index_attribute)
                .map(str::trim)
                .filter(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
            else {
                harvest.anomalies += 1;
                continue;
            };

            let Some(href) = item
                .select(&self.link_selector)
                .next()
                .and_then(|link| link.value().attr("href"))
                .map(str::trim)
                .filter(|href| !href.is_empty())
            else {
                harvest.anomalies += 1;
                continue;
            };

            let Some(url) = normalize_url(base, href) else {
                harvest.anomalies += 1;
                continue;
            };

            let record = LinkRecord {
                id: format!("{}{data_index}", self.id_prefix),
                data_index: data_index.to_string(),
                job_name: tuple.job_name.clone(),
                location: tuple.location.clone(),
                url,
                new_href: false,
            };
            harvest.upsert(&mut positions, record);
        }

        if harvest.anomalies > 0 {
            debug!("Skipped {} malformed listing cards", harvest.anomalies);
        }

        harvest
    }
}

fn normalize_url(base: &Url, href: &str) -> Option<String> {
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::JustJoin;
    use crate::traits::SearchSite;

    fn harvester() -> LinkHarvester {
        LinkHarvester::new(JustJoin::default().profile(), RetryPolicy::no_retry()).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://justjoin.it/job-offers/remote?keyword=QA").unwrap()
    }

    fn tuple() -> SearchTuple {
        SearchTuple::new("QA", "remote")
    }

    #[test]
    fn test_extracts_absolute_urls_and_prefixed_ids() {
        let html = r#"
            <ul>
              <li data-index="0"><a href="/job-offer/acme-qa">Acme</a></li>
              <li data-index="1"><a href="https://justjoin.it/job-offer/beta-qa#apply">Beta</a></li>
            </ul>"#;

        let harvest = harvester().extract(html, &base(), &tuple());

        assert_eq!(harvest.anomalies, 0);
        assert_eq!(harvest.records.len(), 2);
        assert_eq!(harvest.records[0].id, "jj-0");
        assert_eq!(harvest.records[0].url, "https://justjoin.it/job-offer/acme-qa");
        assert_eq!(harvest.records[1].url, "https://justjoin.it/job-offer/beta-qa");
        assert_eq!(harvest.records[1].job_name, "QA");
        assert_eq!(harvest.records[1].location, "remote");
    }

    #[test]
    fn test_malformed_cards_are_counted_not_fatal() {
        let html = r#"
            <ul>
              <li data-index="3"><span>no link</span></li>
              <li data-index="x7"><a href="/job-offer/bad-index">Bad</a></li>
              <li data-index=""><a href="/job-offer/empty-index">Empty</a></li>
              <li data-index="4"><a href="/job-offer/good">Good</a></li>
              <li data-index="5"><a href="mailto:hr@example.com">Mail</a></li>
            </ul>"#;

        let harvest = harvester().extract(html, &base(), &tuple());

        assert_eq!(harvest.records.len(), 1);
        assert_eq!(harvest.records[0].data_index, "4");
        assert_eq!(harvest.anomalies, 4);
    }

    #[test]
    fn test_rerendered_anchor_keeps_position_last_seen_wins() {
        let html = r#"
            <ul>
              <li data-index="1"><a href="/job-offer/a">A</a></li>
              <li data-index="2"><a href="/job-offer/b">B</a></li>
              <li data-index="9"><a href="/job-offer/a">A again</a></li>
            </ul>"#;

        let harvest = harvester().extract(html, &base(), &tuple());

        assert_eq!(harvest.records.len(), 2);
        assert_eq!(harvest.records[0].url, "https://justjoin.it/job-offer/a");
        assert_eq!(harvest.records[0].data_index, "9");
        assert_eq!(harvest.records[1].data_index, "2");
    }

    #[test]
    fn test_items_outside_lists_are_ignored() {
        let html = r#"
            <div data-index="1"><a href="/job-offer/not-a-card">Nope</a></div>
            <ul><li><a href="/job-offer/no-index">No index attr</a></li></ul>"#;

        let harvest = harvester().extract(html, &base(), &tuple());

        assert!(harvest.records.is_empty());
        assert_eq!(harvest.anomalies, 0);
    }
}
