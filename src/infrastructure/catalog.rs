//! Paginated catalog crawling
//!
//! Walks the course catalog page by page, extracts course identifiers, and
//! appends the ones not already covered by the log's resume set. Page fetch
//! order is strictly sequential: catalog pagination is stateful in the
//! underlying browsing session, so pages are never fetched concurrently.

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::errors::HarvestError;
use crate::infrastructure::append_log::{AppendLog, resume_set};
use crate::infrastructure::browser::BrowserContext;
use crate::infrastructure::session::join_url;

/// CSS selectors for catalog pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSelectors {
    /// Elements carrying one course identifier each.
    pub course_item: String,
    /// Attribute of `course_item` holding the identifier.
    pub course_id_attr: String,
    /// Pagination links whose numeric texts yield the total page count.
    pub page_link: String,
}

impl Default for CatalogSelectors {
    fn default() -> Self {
        Self {
            course_item: "[data-course-id]".to_string(),
            course_id_attr: "data-course-id".to_string(),
            page_link: "nav.pagination a".to_string(),
        }
    }
}

/// Page window for one crawl. `end_page` of `None` means auto-detect from the
/// catalog root.
#[derive(Debug, Clone, Copy)]
pub struct CatalogRange {
    pub start_page: u32,
    pub end_page: Option<u32>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CatalogSummary {
    pub pages_walked: u32,
    pub ids_seen: usize,
    pub new_ids: usize,
}

pub struct CatalogCrawler {
    base_url: String,
    catalog_path: String,
    selectors: CatalogSelectors,
}

impl CatalogCrawler {
    pub fn new(base_url: impl Into<String>, catalog_path: impl Into<String>, selectors: CatalogSelectors) -> Self {
        Self {
            base_url: base_url.into(),
            catalog_path: catalog_path.into(),
            selectors,
        }
    }

    /// Crawl the catalog and append every identifier not yet in the log.
    ///
    /// Any page fetch failure is fatal: a sequential crawl over stateful
    /// pagination cannot meaningfully skip a page.
    pub async fn collect(
        &self,
        context: &dyn BrowserContext,
        log: &AppendLog,
        range: CatalogRange,
    ) -> Result<CatalogSummary, HarvestError> {
        let end_page = match range.end_page {
            Some(page) => page,
            None => self.detect_total_pages(context).await?,
        };

        let mut seen = resume_set(log.path())?;
        info!(
            start = range.start_page,
            end = end_page,
            resume_ids = seen.len(),
            "collecting catalog pages"
        );

        let mut summary = CatalogSummary::default();
        for page in range.start_page..=end_page {
            let url = self.page_url(page)?;
            let content = context.fetch_page(&url).await?;
            let ids = extract_ids(&content, &self.selectors)?;
            summary.pages_walked += 1;
            summary.ids_seen += ids.len();

            if ids.is_empty() {
                // Not end-of-catalog: sparse pages happen mid-listing.
                debug!(page, "no course identifiers on page");
                continue;
            }

            for id in ids {
                if seen.contains(&id) {
                    continue;
                }
                let mut entry = Map::new();
                entry.insert("id".to_string(), Value::String(id.clone()));
                log.write(&entry).await?;
                seen.insert(id);
                summary.new_ids += 1;
            }
            debug!(page, new_total = summary.new_ids, "page processed");
        }

        info!(
            pages = summary.pages_walked,
            new_ids = summary.new_ids,
            "catalog collection finished"
        );
        Ok(summary)
    }

    /// One detection fetch of the catalog root to derive the last page number.
    pub async fn detect_total_pages(
        &self,
        context: &dyn BrowserContext,
    ) -> Result<u32, HarvestError> {
        let url = join_url(&self.base_url, &self.catalog_path)?;
        let content = context.fetch_page(&url).await?;
        let total = parse_total_pages(&content, &self.selectors).ok_or_else(|| {
            HarvestError::CatalogFormat {
                url: url.clone(),
                reason: "pagination marker not found".to_string(),
            }
        })?;
        info!(total, "detected catalog page count");
        Ok(total)
    }

    fn page_url(&self, page: u32) -> Result<String, HarvestError> {
        join_url(&self.base_url, &format!("{}?page={page}", self.catalog_path))
    }
}

fn parse_total_pages(content: &str, selectors: &CatalogSelectors) -> Option<u32> {
    let document = Html::parse_document(content);

    if let Ok(page_link) = Selector::parse(&selectors.page_link) {
        let max = document
            .select(&page_link)
            .filter_map(|el| {
                el.text()
                    .collect::<String>()
                    .trim()
                    .parse::<u32>()
                    .ok()
            })
            .max();
        if max.is_some() {
            return max;
        }
    }

    // Fallback for catalogs that render "Page 1 of N" instead of numbered links.
    let text = document.root_element().text().collect::<String>();
    Regex::new(r"[Pp]age\s+\d+\s+of\s+(\d+)")
        .ok()?
        .captures(&text)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

fn extract_ids(content: &str, selectors: &CatalogSelectors) -> Result<Vec<String>, HarvestError> {
    let item = Selector::parse(&selectors.course_item)
        .map_err(|e| HarvestError::Browser(format!("invalid course item selector: {e}")))?;

    let document = Html::parse_document(content);
    Ok(document
        .select(&item)
        .filter_map(|el| el.value().attr(&selectors.course_id_attr))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .collect())
}
