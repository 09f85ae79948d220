// src/crawl/craigslist.rs
//! Craigslist fetcher: static search results + posting pages over reqwest,
//! parsed with `scraper`. No JavaScript rendering.

use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::types::{Fetcher, RawListing};
use crate::config::regions::RegionTable;
use crate::error::FetchError;
use crate::identity::normalize_text;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct CraigslistFetcher {
    http: reqwest::Client,
    regions: RegionTable,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl CraigslistFetcher {
    pub fn new(regions: RegionTable) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("building Craigslist HTTP client")?;
        Ok(Self {
            http,
            regions,
            min_interval: Duration::from_millis(500),
            last_request: Mutex::new(None),
        })
    }

    /// Minimum spacing between any two requests from this fetcher.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let next = prev + self.min_interval;
            if next > Instant::now() {
                tokio::time::sleep_until(next).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_html(&self, url: &str) -> Result<String, FetchError> {
        self.pace().await;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Fetcher for CraigslistFetcher {
    fn search_url(&self, keywords: &str, location: &str, distance: u32) -> Result<String, FetchError> {
        let region = self.regions.region_for(location);
        let base = format!("https://{region}.craigslist.org/search/sss");
        let distance = distance.to_string();
        let url = Url::parse_with_params(
            &base,
            &[
                ("query", keywords),
                ("postal", location),
                ("search_distance", distance.as_str()),
            ],
        )
        .map_err(|_| FetchError::InvalidUrl { url: base.clone() })?;
        Ok(url.to_string())
    }

    async fn search(&self, search_url: &str) -> Result<Vec<RawListing>, FetchError> {
        let base = Url::parse(search_url).map_err(|_| FetchError::InvalidUrl {
            url: search_url.to_string(),
        })?;
        let html = self.get_html(search_url).await?;
        Ok(parse_search_page(&html, &base))
    }

    async fn detail(&self, stub: RawListing) -> Result<RawListing, FetchError> {
        let html = self.get_html(&stub.url).await?;
        Ok(parse_posting_page(&html, stub))
    }

    fn name(&self) -> &'static str {
        "craigslist"
    }
}

/// Static result entries in page order (newest first).
pub fn parse_search_page(html: &str, base: &Url) -> Vec<RawListing> {
    let doc = Html::parse_document(html);
    let (Ok(item_sel), Ok(link_sel)) = (
        Selector::parse("li.cl-static-search-result"),
        Selector::parse("a[href]"),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in doc.select(&item_sel) {
        let Some(link) = item.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href) else {
            continue;
        };
        let title = first_text(&item, ".title")
            .or_else(|| item.value().attr("title").map(normalize_text))
            .unwrap_or_else(|| element_text(&link));
        let price = first_text(&item, ".price").unwrap_or_default();
        out.push(RawListing::stub(url.to_string(), title, price));
    }
    out
}

/// Fill description, price and zip from a posting page.
pub fn parse_posting_page(html: &str, mut stub: RawListing) -> RawListing {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    if let Ok(body_sel) = Selector::parse("section#postingbody") {
        if let Some(body) = doc.select(&body_sel).next() {
            let mut text = element_text(&body);
            // "QR Code Link to This Post" block
            if let Some(noise) = first_text(&body, ".print-information") {
                text = text.replacen(&noise, "", 1).trim().to_string();
            }
            stub.description = Some(text);
        }
    }

    if let Some(price) = first_text(&root, "span.price").or_else(|| first_text(&root, "span.priceinfo")) {
        stub.price = price;
    }

    stub.location_zip = [".mapAndAttrs", ".postingtitle"]
        .iter()
        .filter_map(|sel| first_text(&root, sel))
        .find_map(|t| find_zip(&t));
    stub
}

fn first_text(scope: &ElementRef<'_>, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    scope
        .select(&sel)
        .next()
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty())
}

fn element_text(el: &ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn find_zip(text: &str) -> Option<String> {
    static RE_ZIP: OnceCell<Regex> = OnceCell::new();
    let re = RE_ZIP.get_or_init(|| Regex::new(r"\b\d{5}\b").unwrap());
    re.find(text).map(|m| m.as_str().to_string())
}
