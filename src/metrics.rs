use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Fails if another recorder is already set.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Idempotent; descriptions only show up once a recorder is installed.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("crawl_runs_total", "Crawl passes started, by mode.");
        describe_counter!("crawl_items_new_total", "New listings fully fetched.");
        describe_counter!("crawl_fetch_errors_total", "Listings skipped after a detail fetch error.");
        describe_counter!("crawl_fetch_failures_total", "Result pages that could not be loaded.");
        describe_counter!(
            "evaluate_scorer_fallbacks_total",
            "Evaluations replaced by the neutral score."
        );
        describe_counter!("evaluate_matches_total", "Listings that cleared the threshold.");
        describe_counter!("seen_set_merges_total", "Successful seen-set merges.");
        describe_counter!("pipeline_busy_total", "Runs rejected because the fingerprint was leased.");
        describe_counter!("notify_failures_total", "Notifications that failed after retries.");
        describe_counter!("scheduler_ticks_total", "Scheduler ticks that launched a round of watches.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when a run last finished.");
    });
}
