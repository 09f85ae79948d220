// src/pipeline.rs
//! One polling run for one watch:
//!
//! lease → seen-set read → search URL → crawl → evaluate → merge → report → notify
//!
//! The lease is held until the run returns, on every path. The seen-set is
//! written once, after evaluation, with the identities of every fully fetched
//! listing. A failed merge aborts the run before anything is notified.

use chrono::Utc;
use metrics::{counter, gauge};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::crawl::types::Fetcher;
use crate::crawl::{select_mode, CrawlController, CrawlMode, CrawlResult};
use crate::error::RunError;
use crate::evaluate::{EvaluationFilter, FilterOutcome, Passthrough, QueryRefiner, Scorer, ThresholdTable};
use crate::fingerprint::Fingerprint;
use crate::history::History;
use crate::lease::RunLeases;
use crate::notify::{MatchAlert, NoopNotifier, Notifier};
use crate::report::{LogEntry, NotifyStatus, RunOutcome, RunReport, RunStatus};
use crate::store::SeenSetStore;

pub struct Pipeline {
    crawler: CrawlController,
    filter: EvaluationFilter,
    refiner: Arc<dyn QueryRefiner>,
    store: Arc<dyn SeenSetStore>,
    notifier: Arc<dyn Notifier>,
    leases: RunLeases,
    thresholds: ThresholdTable,
    history: Arc<History>,
    deadline: Option<Duration>,
    run_counts: Mutex<HashMap<Fingerprint, u64>>,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn Fetcher>, scorer: Arc<dyn Scorer>, store: Arc<dyn SeenSetStore>) -> Self {
        Self {
            crawler: CrawlController::new(fetcher),
            filter: EvaluationFilter::new(scorer),
            refiner: Arc::new(Passthrough),
            store,
            notifier: Arc::new(NoopNotifier),
            leases: RunLeases::new(),
            thresholds: ThresholdTable::default(),
            history: Arc::new(History::default()),
            deadline: None,
            run_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn QueryRefiner>) -> Self {
        self.refiner = refiner;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdTable) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_history(mut self, history: Arc<History>) -> Self {
        self.history = history;
        self
    }

    /// Cancel the run this long after it starts.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_scan_cap(mut self, cap: usize) -> Self {
        self.crawler = self.crawler.with_scan_cap(cap);
        self
    }

    /// Upper bound on scorer calls in flight within one run.
    pub fn with_scorer_concurrency(mut self, n: usize) -> Self {
        self.filter = self.filter.with_max_concurrency(n);
        self
    }

    pub fn history(&self) -> &Arc<History> {
        &self.history
    }

    pub fn leases(&self) -> &RunLeases {
        &self.leases
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Run one poll for `watch`. Every outcome, fatal or not, lands in the
    /// history log.
    pub async fn run(&self, watch: &WatchConfig, cancel: CancellationToken) -> Result<RunReport, RunError> {
        let result = self.run_leased(watch, cancel).await;
        match &result {
            Ok(report) => {
                tracing::info!(
                    target: "pipeline",
                    label = %report.label,
                    fp = report.fingerprint.short(),
                    mode = report.outcome.mode.as_str(),
                    inspected = report.outcome.total_fetched,
                    new = report.outcome.new_count,
                    matches = report.outcome.matched_count,
                    "{}",
                    report.summary()
                );
                self.history.push(report.log_entry());
            }
            Err(e) => {
                tracing::warn!(target: "pipeline", label = %watch.label, kind = e.kind(), error = %e, "run failed");
                self.history.push(LogEntry::for_error(&watch.label, e));
            }
        }
        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        result
    }

    async fn run_leased(&self, watch: &WatchConfig, cancel: CancellationToken) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        let cutoff = self.thresholds.cutoff(watch.threshold);
        let fp = watch.fingerprint()?;

        let Some(_lease) = self.leases.try_acquire(&fp) else {
            counter!("pipeline_busy_total").increment(1);
            return Err(RunError::Busy(fp.to_string()));
        };

        let token = cancel.child_token();
        let _timer = self.deadline.map(|d| DeadlineTimer::start(token.clone(), d));

        let seen = self.store.get(&fp).await?;
        // Seeding is a one-off: once anything is seen, monitoring takes over.
        let mode = if watch.seed_only && seen.is_empty() {
            CrawlMode::Seed
        } else {
            select_mode(&seen, watch.mode)
        };

        let draft = ReportDraft {
            watch,
            fingerprint: fp.clone(),
            cutoff,
            started_at,
        };

        // Keywords only shape the URL; the fingerprint stays on the raw query.
        let keywords = if mode == CrawlMode::Seed {
            watch.query.clone()
        } else {
            self.refiner.refine(&watch.query).await
        };
        let search_url = match self
            .crawler
            .fetcher()
            .search_url(&keywords, &watch.location, watch.distance)
        {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(target: "pipeline", error = %e, "could not build search URL");
                let crawl = CrawlResult::failed(mode, e.to_string());
                let run_number = self.next_run_number(&fp, mode);
                return Ok(draft.finish(run_number, &crawl, FilterOutcome::default(), NotifyStatus::NotAttempted));
            }
        };
        tracing::debug!(target: "pipeline", fp = fp.short(), mode = mode.as_str(), url = %search_url, "starting crawl");

        let crawl = self
            .crawler
            .crawl(mode, &search_url, &seen, watch.initial_limit, &token)
            .await;
        let run_number = self.next_run_number(&fp, mode);

        if crawl.fetch_failed() {
            return Ok(draft.finish(run_number, &crawl, FilterOutcome::default(), NotifyStatus::NotAttempted));
        }

        let filtered = if mode == CrawlMode::Seed {
            FilterOutcome::default()
        } else {
            self.filter
                .filter(&crawl.listings, &watch.criteria, cutoff, &token)
                .await
        };

        let identities: BTreeSet<String> = crawl.listings.iter().map(|l| l.identity.clone()).collect();
        self.store.merge(&fp, &identities).await?;
        if !identities.is_empty() {
            counter!("seen_set_merges_total").increment(1);
        }

        let notification = self.notify(watch, &filtered).await;
        Ok(draft.finish(run_number, &crawl, filtered, notification))
    }

    async fn notify(&self, watch: &WatchConfig, filtered: &FilterOutcome) -> NotifyStatus {
        if filtered.matches.is_empty() {
            return NotifyStatus::NotAttempted;
        }
        if !self.notifier.enabled() {
            return NotifyStatus::Skipped;
        }
        let alert = MatchAlert {
            label: watch.label.clone(),
            query: watch.query.clone(),
            matches: filtered.matches.clone(),
            timestamp_iso: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };
        match self.notifier.send(&alert).await {
            Ok(()) => NotifyStatus::Delivered,
            Err(e) => {
                tracing::warn!(target: "notify", notifier = self.notifier.name(), error = %e, "notification failed");
                counter!("notify_failures_total").increment(1);
                NotifyStatus::Failed(e.to_string())
            }
        }
    }

    /// Initial and seed runs are "Scrape: 0"; incremental runs count up.
    fn next_run_number(&self, fp: &Fingerprint, mode: CrawlMode) -> u64 {
        let mut counts = self.run_counts.lock().unwrap_or_else(|e| e.into_inner());
        let n = counts.entry(fp.clone()).or_insert(0);
        match mode {
            CrawlMode::Initial | CrawlMode::Seed => *n = 0,
            CrawlMode::Incremental => *n += 1,
        }
        *n
    }
}

/// Run `pipeline.run` on its own task so the caller can await or drop it.
pub fn spawn_run(
    pipeline: Arc<Pipeline>,
    watch: WatchConfig,
    cancel: CancellationToken,
) -> JoinHandle<Result<RunReport, RunError>> {
    tokio::spawn(async move { pipeline.run(&watch, cancel).await })
}

struct ReportDraft<'a> {
    watch: &'a WatchConfig,
    fingerprint: Fingerprint,
    cutoff: f32,
    started_at: chrono::DateTime<Utc>,
}

impl ReportDraft<'_> {
    fn finish(
        self,
        run_number: u64,
        crawl: &CrawlResult,
        filtered: FilterOutcome,
        notification: NotifyStatus,
    ) -> RunReport {
        let status = if let Some(reason) = &crawl.failure {
            RunStatus::FetchFailed(reason.clone())
        } else if crawl.cancelled || filtered.cancelled {
            RunStatus::Cancelled
        } else if crawl.mode == CrawlMode::Seed {
            RunStatus::Seeded
        } else {
            RunStatus::Completed
        };
        let scorer_fallbacks = filtered.fallbacks;
        RunReport {
            label: self.watch.label.clone(),
            fingerprint: self.fingerprint,
            run_number,
            status,
            outcome: RunOutcome::build(crawl, filtered),
            cutoff: self.cutoff,
            initial_limit: self.watch.initial_limit,
            item_errors: crawl.item_errors,
            scorer_fallbacks,
            notification,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Cancels `token` after `after`; the timer task is aborted on drop.
struct DeadlineTimer(JoinHandle<()>);

impl DeadlineTimer {
    fn start(token: CancellationToken, after: Duration) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tracing::warn!(target: "pipeline", secs = after.as_secs(), "run deadline reached, cancelling");
            token.cancel();
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchSpec;
    use crate::crawl::fixture::FixtureFetcher;
    use crate::crawl::types::RawListing;
    use crate::error::PersistenceError;
    use crate::evaluate::MockScorer;
    use crate::notify::RecordingNotifier;
    use crate::store::{MemorySeenStore, SeenSet};
    use async_trait::async_trait;

    fn stub(n: u32) -> RawListing {
        RawListing::stub(
            format!("https://sfbay.craigslist.org/sfc/bik/d/bike-{n}/{}.html", 7_100_000 + n),
            format!("Bike {n}"),
            format!("${}", 200 + n),
        )
    }

    fn id(n: u32) -> String {
        format!("cl:{}", 7_100_000 + n)
    }

    fn watch(extra: &str) -> WatchConfig {
        let json = format!(
            r#"{{"query":"bike","location":"94105","distance":15,"threshold":"strict"{extra}}}"#
        );
        let spec: WatchSpec = serde_json::from_str(&json).unwrap();
        WatchConfig::try_from(spec).unwrap()
    }

    struct Harness {
        fetcher: Arc<FixtureFetcher>,
        store: Arc<MemorySeenStore>,
        notifier: Arc<RecordingNotifier>,
        pipeline: Pipeline,
    }

    fn harness(page: Vec<RawListing>, scorer: MockScorer) -> Harness {
        let fetcher = Arc::new(FixtureFetcher::new(page));
        let store = Arc::new(MemorySeenStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let pipeline = Pipeline::new(fetcher.clone(), Arc::new(scorer), store.clone())
            .with_notifier(notifier.clone());
        Harness {
            fetcher,
            store,
            notifier,
            pipeline,
        }
    }

    async fn seen(h: &Harness, w: &WatchConfig) -> SeenSet {
        h.store.get(&w.fingerprint().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn initial_run_scores_filters_merges_and_notifies() {
        let scorer = MockScorer::new(0.0).with_score(id(1), 0.9).with_score(id(2), 0.4);
        let h = harness(vec![stub(1), stub(2), stub(3)], scorer);
        let w = watch(r#","initial_limit":2"#);

        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();

        assert_eq!(r.status, RunStatus::Completed);
        assert_eq!(r.outcome.mode, CrawlMode::Initial);
        let matched: Vec<_> = r.outcome.matches.iter().map(|m| m.listing.identity.clone()).collect();
        assert_eq!(matched, vec![id(1)]);
        assert_eq!(r.outcome.new_count, 2);
        assert_eq!(seen(&h, &w).await.identities, [id(1), id(2)].into_iter().collect());
        assert_eq!(r.notification, NotifyStatus::Delivered);
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(r.run_number, 0);
        assert_eq!(r.summary(), "Scrape: 0 - Found 1 matches");
    }

    #[tokio::test]
    async fn second_poll_only_sees_newer_posts() {
        let h = harness(vec![stub(1), stub(2)], MockScorer::new(0.8));
        let w = watch("");
        h.pipeline.run(&w, CancellationToken::new()).await.unwrap();

        h.fetcher.push_front(vec![stub(4), stub(3)]);
        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();
        assert_eq!(r.outcome.mode, CrawlMode::Incremental);
        let new: Vec<_> = r.outcome.matches.iter().map(|m| m.listing.identity.clone()).collect();
        assert_eq!(new, vec![id(4), id(3)]);
        assert_eq!(r.outcome.total_fetched, 3, "includes the seen entry that stopped the scan");
        assert_eq!(r.run_number, 1);

        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();
        assert_eq!(r.outcome.new_count, 0);
        assert_eq!(r.summary(), "Scrape: 2 - No new posts found");
        assert_eq!(r.notification, NotifyStatus::NotAttempted);
    }

    #[tokio::test]
    async fn seed_only_marks_newest_and_evaluates_nothing() {
        let scorer = MockScorer::new(1.0);
        let h = harness(vec![stub(9), stub(8)], scorer);
        let w = watch(r#","seed_only":true"#);
        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();
        assert_eq!(r.status, RunStatus::Seeded);
        assert!(r.outcome.matches.is_empty());
        assert_eq!(seen(&h, &w).await.identities, [id(9)].into_iter().collect());
        assert_eq!(h.fetcher.detail_calls(), 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn seed_only_watch_seeds_once_then_monitors() {
        let h = harness(vec![stub(2), stub(1)], MockScorer::new(0.9));
        let w = watch(r#","seed_only":true"#);

        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();
        assert_eq!(r.status, RunStatus::Seeded);

        h.fetcher.push_front(vec![stub(4), stub(3)]);
        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();
        assert_eq!(r.status, RunStatus::Completed);
        assert_eq!(r.outcome.mode, CrawlMode::Incremental);
        let new: Vec<_> = r.outcome.matches.iter().map(|m| m.listing.identity.clone()).collect();
        assert_eq!(new, vec![id(4), id(3)]);
        assert_eq!(seen(&h, &w).await.identities, [id(2), id(3), id(4)].into_iter().collect());
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn seeding_an_empty_page_is_retried_next_run() {
        let h = harness(Vec::new(), MockScorer::new(0.9));
        let w = watch(r#","seed_only":true"#);

        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();
        assert_eq!(r.status, RunStatus::Seeded);
        assert_eq!(r.summary(), "No listings found for seeding");
        assert_eq!(r.level(), crate::report::LogLevel::Warning);
        assert!(seen(&h, &w).await.is_empty());

        h.fetcher.set_page(vec![stub(1)]);
        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();
        assert_eq!(r.status, RunStatus::Seeded);
        assert_eq!(r.summary(), "Seeding completed - monitoring from now");
        assert!(r.outcome.matches.is_empty());
    }

    #[tokio::test]
    async fn failed_search_is_reported_and_nothing_is_merged() {
        let h = harness(vec![stub(1)], MockScorer::new(1.0));
        h.fetcher.set_search_failure(true);
        let w = watch("");
        let r = h.pipeline.run(&w, CancellationToken::new()).await.unwrap();
        assert!(matches!(r.status, RunStatus::FetchFailed(_)));
        assert_eq!(r.outcome.total_fetched, 0);
        assert!(seen(&h, &w).await.is_empty());
        assert!(!h.pipeline.leases().is_held(&w.fingerprint().unwrap()));
    }

    #[tokio::test]
    async fn busy_fingerprint_is_rejected() {
        let h = harness(vec![stub(1)], MockScorer::new(1.0));
        let w = watch("");
        let _held = h.pipeline.leases().try_acquire(&w.fingerprint().unwrap()).unwrap();
        let err = h.pipeline.run(&w, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "busy");
        assert_eq!(h.fetcher.search_calls(), 0);
        let last = h.pipeline.history().snapshot_last_n(1);
        assert_eq!(last[0].message, "Skipped - previous run still in progress");
    }

    #[tokio::test]
    async fn notifier_failure_does_not_undo_merge() {
        let fetcher = Arc::new(FixtureFetcher::new(vec![stub(1)]));
        let store = Arc::new(MemorySeenStore::new());
        let p = Pipeline::new(fetcher, Arc::new(MockScorer::new(0.9)), store.clone())
            .with_notifier(Arc::new(RecordingNotifier::failing()));
        let w = watch("");
        let r = p.run(&w, CancellationToken::new()).await.unwrap();
        assert!(matches!(r.notification, NotifyStatus::Failed(_)));
        assert_eq!(store.get(&w.fingerprint().unwrap()).await.unwrap().len(), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl SeenSetStore for BrokenStore {
        async fn get(&self, _fp: &Fingerprint) -> Result<SeenSet, PersistenceError> {
            Ok(SeenSet::default())
        }
        async fn merge(&self, _fp: &Fingerprint, _ids: &BTreeSet<String>) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("disk full".into()))
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn failed_merge_is_fatal_and_skips_notification() {
        let notifier = Arc::new(RecordingNotifier::new());
        let p = Pipeline::new(
            Arc::new(FixtureFetcher::new(vec![stub(1)])),
            Arc::new(MockScorer::new(0.9)),
            Arc::new(BrokenStore),
        )
        .with_notifier(notifier.clone());
        let w = watch("");
        let err = p.run(&w, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "persistence");
        assert!(notifier.sent().is_empty());
        assert!(!p.leases().is_held(&w.fingerprint().unwrap()));
    }

    #[tokio::test]
    async fn cancelled_run_is_reported_as_cancelled() {
        let h = harness(vec![stub(1), stub(2)], MockScorer::new(0.9));
        let token = CancellationToken::new();
        token.cancel();
        let w = watch("");
        let r = h.pipeline.run(&w, token).await.unwrap();
        assert_eq!(r.status, RunStatus::Cancelled);
        assert!(seen(&h, &w).await.is_empty());
    }

    #[tokio::test]
    async fn spawned_run_is_observable() {
        let h = harness(vec![stub(1)], MockScorer::new(0.9));
        let p = Arc::new(h.pipeline);
        let r = spawn_run(p, watch(""), CancellationToken::new()).await.unwrap();
        assert!(r.is_ok());
    }
}
