//! listing-sentinel service entrypoint.
//! Boots tracing, loads config, starts the poll scheduler and serves the
//! Axum router (health, on-demand runs, history, metrics).

use shuttle_axum::ShuttleAxum;
use std::sync::Arc;

use listing_sentinel::api::{self, AppState};
use listing_sentinel::history::History;
use listing_sentinel::metrics::Metrics;
use listing_sentinel::scheduler::{spawn_scheduler, SchedulerCfg};
use listing_sentinel::{build_pipeline, init_tracing, AppConfig};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    // anyhow errors convert into shuttle's custom error variant.
    let cfg = AppConfig::load_default()?;
    let watches = cfg.watch_configs().map_err(anyhow::Error::from)?;

    let history = Arc::new(History::default());
    let pipeline = Arc::new(build_pipeline(&cfg, history)?);

    let state = AppState::new(pipeline.clone());
    if watches.is_empty() {
        tracing::warn!("no watches configured; only on-demand runs via POST /run");
    } else {
        tracing::info!(watches = watches.len(), every_secs = cfg.poll_interval.as_secs(), "starting scheduler");
        let _scheduler = spawn_scheduler(
            pipeline,
            watches,
            SchedulerCfg {
                interval: cfg.poll_interval,
            },
            state.shutdown.clone(),
        );
    }

    let mut router = api::router(state);
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "metrics disabled"),
    }

    Ok(router.into())
}
