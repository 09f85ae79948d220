// src/scheduler.rs
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::error::RunError;
use crate::pipeline::{spawn_run, Pipeline};
use crate::report::RunReport;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
}

/// Tick every `cfg.interval` and run every watch concurrently. The first tick
/// fires immediately. A tick waits for all of its runs before the next one, so
/// a slow run is skipped over rather than stacked. Cancel `shutdown` to stop;
/// in-flight runs see the same token.
pub fn spawn_scheduler(
    pipeline: Arc<Pipeline>,
    watches: Vec<WatchConfig>,
    cfg: SchedulerCfg,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            counter!("scheduler_ticks_total").increment(1);

            let mut runs = JoinSet::new();
            for w in &watches {
                let p = pipeline.clone();
                let w = w.clone();
                let token = shutdown.child_token();
                runs.spawn(async move { p.run(&w, token).await });
            }
            let (mut ok, mut failed) = (0usize, 0usize);
            while let Some(res) = runs.join_next().await {
                match res {
                    Ok(Ok(_)) => ok += 1,
                    Ok(Err(_)) => failed += 1,
                    Err(e) => {
                        tracing::error!(target: "pipeline", error = %e, "run task panicked");
                        failed += 1;
                    }
                }
            }
            tracing::info!(target: "pipeline", ok, failed, "scheduler tick done");
        }
        tracing::info!(target: "pipeline", "scheduler stopped");
    })
}

/// Run one watch now, outside the ticker. The handle resolves with the
/// report or the fatal error.
pub fn trigger_now(
    pipeline: Arc<Pipeline>,
    watch: WatchConfig,
    shutdown: &CancellationToken,
) -> JoinHandle<Result<RunReport, RunError>> {
    spawn_run(pipeline, watch, shutdown.child_token())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchSpec;
    use crate::crawl::fixture::FixtureFetcher;
    use crate::crawl::types::RawListing;
    use crate::evaluate::MockScorer;
    use crate::store::{MemorySeenStore, SeenSetStore};

    fn watch(q: &str) -> WatchConfig {
        let spec = WatchSpec {
            label: None,
            query: q.into(),
            location: "94105".into(),
            distance: crate::config::watch::Distance::Miles(15),
            threshold: None,
            initial_limit: None,
            seed_only: false,
            mode: None,
            owner_id: None,
            task_id: None,
            criteria: None,
        };
        WatchConfig::try_from(spec).unwrap()
    }

    fn pipeline(store: Arc<MemorySeenStore>) -> Arc<Pipeline> {
        let f = Arc::new(FixtureFetcher::new(vec![RawListing::stub(
            "https://sfbay.craigslist.org/bik/7300000001.html",
            "Bike",
            "$100",
        )]));
        Arc::new(Pipeline::new(f, Arc::new(MockScorer::new(0.9)), store))
    }

    #[tokio::test]
    async fn trigger_now_returns_the_report() {
        let store = Arc::new(MemorySeenStore::new());
        let p = pipeline(store.clone());
        let report = trigger_now(p, watch("bike"), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome.matched_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_every_watch_and_stops_on_cancel() {
        let store = Arc::new(MemorySeenStore::new());
        let p = pipeline(store.clone());
        let shutdown = CancellationToken::new();
        let handle = spawn_scheduler(
            p.clone(),
            vec![watch("bike"), watch("kayak")],
            SchedulerCfg {
                interval: Duration::from_secs(60),
            },
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        shutdown.cancel();
        handle.await.unwrap();

        for q in ["bike", "kayak"] {
            let fp = watch(q).fingerprint().unwrap();
            assert_eq!(store.get(&fp).await.unwrap().len(), 1);
        }
        assert!(p.history().len() >= 2);
    }
}
