// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod crawl;
pub mod error;
pub mod evaluate;
pub mod fingerprint;
pub mod history;
pub mod identity;
pub mod lease;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::{AppConfig, WatchConfig, WatchSpec};
pub use crate::error::RunError;
pub use crate::pipeline::Pipeline;
pub use crate::report::RunReport;

use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{AiConfig, RegionTable};
use crate::crawl::craigslist::CraigslistFetcher;
use crate::crawl::types::Fetcher;
use crate::evaluate::openai::{build_refiner, build_scorer};
use crate::history::History;
use crate::store::FileSeenStore;

/// Install the global subscriber. `RUST_LOG` wins over the default filter;
/// `LOG_FORMAT=json` switches to JSON lines. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("listing_sentinel=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Composition root: Craigslist fetcher, configured scorer/refiner, file
/// seen-set store and notifier, all from `cfg`.
pub fn build_pipeline(cfg: &AppConfig, history: Arc<History>) -> anyhow::Result<Pipeline> {
    let regions = match &cfg.regions_path {
        Some(p) => RegionTable::load_from(p)?,
        None => RegionTable::default(),
    };
    let fetcher = Arc::new(CraigslistFetcher::new(regions)?);
    build_pipeline_with(cfg, history, fetcher)
}

/// Same wiring as [`build_pipeline`] around any fetcher (`run_once --fixture`).
pub fn build_pipeline_with(
    cfg: &AppConfig,
    history: Arc<History>,
    fetcher: Arc<dyn Fetcher>,
) -> anyhow::Result<Pipeline> {
    let ai = AiConfig::load_or_default(&cfg.ai_config_path)?;
    let store = Arc::new(FileSeenStore::new(&cfg.state_dir));

    tracing::info!(
        fetcher = fetcher.name(),
        state_dir = %cfg.state_dir.display(),
        ai = ai.enabled,
        model = %ai.model,
        notifications = cfg.discord_webhook.is_some(),
        "pipeline configured"
    );

    Ok(Pipeline::new(fetcher, build_scorer(&ai)?, store)
        .with_refiner(build_refiner(&ai)?)
        .with_notifier(notify::notifier_from_webhook(cfg.discord_webhook.as_deref()))
        .with_thresholds(cfg.thresholds)
        .with_history(history)
        .with_scan_cap(cfg.scan_cap)
        .with_scorer_concurrency(ai.max_concurrency)
        .with_deadline(cfg.run_deadline))
}
