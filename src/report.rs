// src/report.rs
//! Run Reporter: pure aggregation of one run into a `RunOutcome`, a one-line
//! summary and a structured detail string. Scheduled and on-demand runs
//! report identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crawl::{CrawlMode, CrawlResult};
use crate::error::RunError;
use crate::evaluate::{FilterOutcome, Match};
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Result entries inspected, including the seen entry that stopped the scan.
    pub total_fetched: usize,
    pub new_count: usize,
    pub matched_count: usize,
    pub matches: Vec<Match>,
    pub mode: CrawlMode,
}

impl RunOutcome {
    pub fn build(crawl: &CrawlResult, filtered: FilterOutcome) -> Self {
        Self {
            total_fetched: crawl.inspected,
            new_count: crawl.listings.len(),
            matched_count: filtered.matches.len(),
            matches: filtered.matches,
            mode: crawl.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Seeded,
    /// The result page could not be loaded; distinct from "nothing new".
    FetchFailed(String),
    /// Deadline or shutdown hit mid-run; partial results were kept.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum NotifyStatus {
    NotAttempted,
    Skipped,
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One operator-facing history line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub level: LogLevel,
    pub message: String,
    pub details: String,
}

impl LogEntry {
    pub fn for_error(label: &str, err: &RunError) -> Self {
        let message = match err {
            RunError::Busy(_) => "Skipped - previous run still in progress".to_string(),
            RunError::Config(_) => "Rejected - invalid configuration".to_string(),
            RunError::Persistence(_) => "Failed - seen-set unavailable".to_string(),
        };
        Self {
            timestamp: Utc::now(),
            label: label.to_string(),
            level: if matches!(err, RunError::Busy(_)) {
                LogLevel::Warning
            } else {
                LogLevel::Error
            },
            message,
            details: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub label: String,
    pub fingerprint: Fingerprint,
    /// 0 for an initial run, then counts up per fingerprint.
    pub run_number: u64,
    pub status: RunStatus,
    pub outcome: RunOutcome,
    pub cutoff: f32,
    pub initial_limit: usize,
    pub item_errors: usize,
    pub scorer_fallbacks: usize,
    pub notification: NotifyStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        let n = self.run_number;
        match &self.status {
            RunStatus::Seeded if self.outcome.new_count == 0 => "No listings found for seeding".to_string(),
            RunStatus::Seeded => "Seeding completed - monitoring from now".to_string(),
            RunStatus::FetchFailed(_) => format!("Scrape: {n} - Failed - could not load results"),
            RunStatus::Cancelled => format!(
                "Scrape: {n} - Cancelled - Found {} matches before deadline",
                self.outcome.matched_count
            ),
            RunStatus::Completed if self.outcome.new_count == 0 => {
                format!("Scrape: {n} - No new posts found")
            }
            RunStatus::Completed => {
                format!("Scrape: {n} - Found {} matches", self.outcome.matched_count)
            }
        }
    }

    pub fn detail(&self) -> String {
        let o = &self.outcome;
        let mut s = match &self.status {
            RunStatus::Seeded if o.new_count == 0 => "Result page was empty; seeding retries on the next run".to_string(),
            RunStatus::Seeded => format!("Seen-set seeded with the newest listing ({} inspected)", o.total_fetched),
            RunStatus::FetchFailed(reason) => format!("Result page fetch failed: {reason}"),
            _ => {
                let scope = match o.mode {
                    CrawlMode::Initial => format!("limited to {} most recent", self.initial_limit),
                    _ => "new listings only".to_string(),
                };
                format!(
                    "Inspected: {} ({scope}), New: {}, Matches: {}, Threshold: {:.2}",
                    o.total_fetched, o.new_count, o.matched_count, self.cutoff
                )
            }
        };
        if self.item_errors > 0 {
            s.push_str(&format!(", Skipped: {}", self.item_errors));
        }
        if self.scorer_fallbacks > 0 {
            s.push_str(&format!(", Neutral scores: {}", self.scorer_fallbacks));
        }
        if let NotifyStatus::Failed(e) = &self.notification {
            s.push_str(&format!(", Notification failed: {e}"));
        }
        s
    }

    pub fn level(&self) -> LogLevel {
        match &self.status {
            RunStatus::Seeded if self.outcome.new_count == 0 => LogLevel::Warning,
            RunStatus::Seeded => LogLevel::Success,
            RunStatus::FetchFailed(_) | RunStatus::Cancelled => LogLevel::Warning,
            RunStatus::Completed if self.outcome.matched_count > 0 => LogLevel::Success,
            RunStatus::Completed => LogLevel::Info,
        }
    }

    pub fn log_entry(&self) -> LogEntry {
        LogEntry {
            timestamp: self.finished_at,
            label: self.label.clone(),
            level: self.level(),
            message: self.summary(),
            details: self.detail(),
        }
    }
}
