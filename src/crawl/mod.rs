// src/crawl/mod.rs
//! Crawl Controller: one polling pass over a search.
//!
//! * `Initial`: up to `limit` most recent entries, detail pages fetched
//!   concurrently, every entry counts as new.
//! * `Incremental`: entries inspected strictly in rank order; the first one
//!   already in the seen-set stops the scan and no further detail fetch is
//!   issued. Reaching the scan cap without a hit is a normal outcome.
//! * `Seed`: only the newest entry's identity, nothing to evaluate.
//!
//! The controller never writes the seen-set. The caller merges after
//! evaluation, so items lost to a crash are not marked processed.

pub mod craigslist;
pub mod fixture;
pub mod types;

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, FetchError};
use crate::identity::identity;
use crate::store::SeenSet;
use types::{Fetcher, Listing, RawListing};

pub const DEFAULT_INITIAL_LIMIT: usize = 6;
pub const DEFAULT_SCAN_CAP: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    Initial,
    Incremental,
    Seed,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::Initial => "initial",
            CrawlMode::Incremental => "incremental",
            CrawlMode::Seed => "seed",
        }
    }
}

/// Operator override of the empty-set rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeOverride {
    #[default]
    Auto,
    Initial,
    Incremental,
}

impl FromStr for ModeOverride {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(ModeOverride::Auto),
            "initial" => Ok(ModeOverride::Initial),
            "incremental" => Ok(ModeOverride::Incremental),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Empty seen-set → `Initial`, otherwise `Incremental`, unless overridden.
pub fn select_mode(seen: &SeenSet, over: ModeOverride) -> CrawlMode {
    match over {
        ModeOverride::Initial => CrawlMode::Initial,
        ModeOverride::Incremental => CrawlMode::Incremental,
        ModeOverride::Auto if seen.is_empty() => CrawlMode::Initial,
        ModeOverride::Auto => CrawlMode::Incremental,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrawlResult {
    pub mode: CrawlMode,
    /// New, fully fetched listings in rank order.
    pub listings: Vec<Listing>,
    /// Result entries looked at, including the seen entry that stopped the scan.
    pub inspected: usize,
    /// Identity of the already-seen entry that ended an incremental scan.
    pub stopped_at: Option<String>,
    /// Entries skipped because their detail fetch failed.
    pub item_errors: usize,
    /// The result page itself could not be fetched.
    pub failure: Option<String>,
    pub cancelled: bool,
}

impl CrawlResult {
    fn empty(mode: CrawlMode) -> Self {
        Self {
            mode,
            listings: Vec::new(),
            inspected: 0,
            stopped_at: None,
            item_errors: 0,
            failure: None,
            cancelled: false,
        }
    }

    /// No result page at all, e.g. the search URL could not be built.
    pub fn failed(mode: CrawlMode, reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::empty(mode)
        }
    }

    pub fn fetch_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Incremental scan ran to the cap without meeting a seen entry.
    pub fn exhausted_without_hit(&self) -> bool {
        self.mode == CrawlMode::Incremental
            && self.stopped_at.is_none()
            && self.failure.is_none()
            && !self.cancelled
    }
}

pub struct CrawlController {
    fetcher: Arc<dyn Fetcher>,
    scan_cap: usize,
}

impl CrawlController {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            scan_cap: DEFAULT_SCAN_CAP,
        }
    }

    pub fn with_scan_cap(mut self, cap: usize) -> Self {
        self.scan_cap = cap.max(1);
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn scan_cap(&self) -> usize {
        self.scan_cap
    }

    /// Run one pass in `mode`. `limit` bounds `Initial` runs only.
    pub async fn crawl(
        &self,
        mode: CrawlMode,
        search_url: &str,
        seen: &SeenSet,
        limit: usize,
        cancel: &CancellationToken,
    ) -> CrawlResult {
        counter!("crawl_runs_total", "mode" => mode.as_str()).increment(1);
        let out = match mode {
            CrawlMode::Initial => self.initial(search_url, limit, cancel).await,
            CrawlMode::Incremental => {
                let mut out = self
                    .fetch_until(search_url, self.scan_cap, |id| seen.contains(id), cancel)
                    .await;
                out.mode = CrawlMode::Incremental;
                if out.exhausted_without_hit() && !seen.is_empty() {
                    tracing::info!(
                        target: "crawl",
                        inspected = out.inspected,
                        "no previously seen entry within scan cap; more new items than expected"
                    );
                }
                out
            }
            CrawlMode::Seed => self.seed(search_url, cancel).await,
        };
        counter!("crawl_items_new_total").increment(out.listings.len() as u64);
        out
    }

    /// Fetch up to `max` entries in rank order, stopping at the first entry
    /// whose identity satisfies `stop`. Detail fetches are sequential and a
    /// not-yet-issued fetch is never started once stopped or cancelled.
    pub async fn fetch_until<F>(
        &self,
        search_url: &str,
        max: usize,
        stop: F,
        cancel: &CancellationToken,
    ) -> CrawlResult
    where
        F: Fn(&str) -> bool,
    {
        let mut out = CrawlResult::empty(CrawlMode::Incremental);
        let Some(stubs) = self.search_page(search_url, cancel, &mut out).await else {
            return out;
        };

        let mut run_ids = HashSet::new();
        for stub in stubs.into_iter().take(max) {
            if cancel.is_cancelled() {
                out.cancelled = true;
                break;
            }
            out.inspected += 1;
            let id = identity(&stub);
            if stop(&id) {
                tracing::debug!(target: "crawl", rank = out.inspected, %id, "seen entry, stopping");
                out.stopped_at = Some(id);
                break;
            }
            if !run_ids.insert(id.clone()) {
                continue; // same posting listed twice on one page
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.fetcher.detail(stub) => Some(r),
            };
            match fetched {
                None => {
                    out.cancelled = true;
                    break;
                }
                Some(Ok(raw)) => out.listings.push(Listing::from_raw(id, raw)),
                Some(Err(e)) => self.item_failed(&mut out, &id, &e),
            }
        }
        out
    }

    async fn initial(&self, search_url: &str, limit: usize, cancel: &CancellationToken) -> CrawlResult {
        let mut out = CrawlResult::empty(CrawlMode::Initial);
        let Some(stubs) = self.search_page(search_url, cancel, &mut out).await else {
            return out;
        };

        let mut run_ids = HashSet::new();
        let mut tasks = JoinSet::new();
        for (rank, stub) in stubs.into_iter().take(limit).enumerate() {
            out.inspected += 1;
            let id = identity(&stub);
            if !run_ids.insert(id.clone()) {
                continue;
            }
            let fetcher = self.fetcher.clone();
            tasks.spawn(async move {
                let r = fetcher.detail(stub).await;
                (rank, id, r)
            });
        }

        let mut done: Vec<(usize, Listing)> = Vec::with_capacity(tasks.len());
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    out.cancelled = true;
                    tasks.abort_all();
                    break;
                }
                next = tasks.join_next() => next,
            };
            match next {
                None => break,
                Some(Ok((rank, id, Ok(raw)))) => done.push((rank, Listing::from_raw(id, raw))),
                Some(Ok((_, id, Err(e)))) => self.item_failed(&mut out, &id, &e),
                Some(Err(join_err)) => {
                    tracing::warn!(target: "crawl", error = %join_err, "detail task failed");
                    out.item_errors += 1;
                }
            }
        }
        done.sort_by_key(|(rank, _)| *rank);
        out.listings = done.into_iter().map(|(_, l)| l).collect();
        out
    }

    /// Newest entry only; its identity is all a seed needs.
    pub async fn seed(&self, search_url: &str, cancel: &CancellationToken) -> CrawlResult {
        let mut out = CrawlResult::empty(CrawlMode::Seed);
        let Some(stubs) = self.search_page(search_url, cancel, &mut out).await else {
            return out;
        };
        if let Some(first) = stubs.into_iter().next() {
            out.inspected = 1;
            let id = identity(&first);
            out.listings.push(Listing::from_raw(id, first));
        }
        out
    }

    async fn search_page(
        &self,
        search_url: &str,
        cancel: &CancellationToken,
        out: &mut CrawlResult,
    ) -> Option<Vec<RawListing>> {
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                out.cancelled = true;
                return None;
            }
            r = self.fetcher.search(search_url) => r,
        };
        match res {
            Ok(stubs) => {
                tracing::debug!(
                    target: "crawl",
                    fetcher = self.fetcher.name(),
                    entries = stubs.len(),
                    "result page loaded"
                );
                Some(stubs)
            }
            Err(e) => {
                tracing::warn!(target: "crawl", error = %e, url = search_url, "result page fetch failed");
                counter!("crawl_fetch_failures_total").increment(1);
                out.failure = Some(e.to_string());
                None
            }
        }
    }

    fn item_failed(&self, out: &mut CrawlResult, id: &str, e: &FetchError) {
        tracing::warn!(target: "crawl", %id, error = %e, "skipping listing");
        counter!("crawl_fetch_errors_total").increment(1);
        out.item_errors += 1;
    }
}
