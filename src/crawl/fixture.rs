// src/crawl/fixture.rs
//! In-memory fetcher serving a canned result page. Used by tests and by the
//! `run_once --fixture` dry run.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::types::{Fetcher, RawListing};
use crate::error::FetchError;

#[derive(Debug, Default)]
pub struct FixtureFetcher {
    page: Mutex<Vec<RawListing>>,
    failing_details: Mutex<HashSet<String>>,
    fail_search: AtomicBool,
    search_calls: AtomicUsize,
    detail_calls: AtomicUsize,
}

impl FixtureFetcher {
    pub fn new(page: Vec<RawListing>) -> Self {
        Self {
            page: Mutex::new(page),
            ..Self::default()
        }
    }

    /// JSON array of `RawListing`.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let page: Vec<RawListing> = serde_json::from_str(&s)?;
        Ok(Self::new(page))
    }

    /// Replace the page, e.g. to simulate new posts between polls.
    pub fn set_page(&self, page: Vec<RawListing>) {
        *self.page.lock().unwrap_or_else(|e| e.into_inner()) = page;
    }

    /// Newer posts go on top.
    pub fn push_front(&self, newer: Vec<RawListing>) {
        let mut page = self.page.lock().unwrap_or_else(|e| e.into_inner());
        let mut merged = newer;
        merged.append(&mut page);
        *page = merged;
    }

    pub fn fail_detail_for(&self, url: &str) {
        self.failing_details
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string());
    }

    pub fn set_search_failure(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    fn search_url(&self, keywords: &str, location: &str, distance: u32) -> Result<String, FetchError> {
        Ok(format!("fixture://search?query={keywords}&postal={location}&search_distance={distance}"))
    }

    async fn search(&self, search_url: &str) -> Result<Vec<RawListing>, FetchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(FetchError::Status {
                url: search_url.to_string(),
                status: 503,
            });
        }
        Ok(self.page.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn detail(&self, stub: RawListing) -> Result<RawListing, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_details
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&stub.url);
        if failing {
            return Err(FetchError::Status {
                url: stub.url,
                status: 404,
            });
        }
        let mut full = stub;
        if full.description.is_none() {
            full.description = Some(format!("{} for sale, {}", full.title, full.price));
        }
        Ok(full)
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
