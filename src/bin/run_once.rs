//! Run every configured watch once and print the reports as JSON lines.
//!
//! Usage: run_once [--fixture listings.json] [--watch LABEL]
//!
//! `--fixture` swaps the Craigslist fetcher for a canned result page (a JSON
//! array of raw listings) so the whole pipeline can be exercised offline.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use listing_sentinel::crawl::fixture::FixtureFetcher;
use listing_sentinel::history::History;
use listing_sentinel::{build_pipeline, build_pipeline_with, init_tracing, AppConfig};

struct Args {
    fixture: Option<PathBuf>,
    watch: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        fixture: None,
        watch: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--fixture" => args.fixture = Some(it.next().context("--fixture needs a path")?.into()),
            "--watch" => args.watch = Some(it.next().context("--watch needs a label")?),
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let args = parse_args()?;

    let cfg = AppConfig::load_default()?;
    let mut watches = cfg.watch_configs()?;
    if let Some(label) = &args.watch {
        watches.retain(|w| &w.label == label);
    }
    if watches.is_empty() {
        bail!("no watches to run (configure [[watch]] entries in config/sentinel.toml)");
    }

    let history = Arc::new(History::default());
    let pipeline = match &args.fixture {
        Some(path) => build_pipeline_with(&cfg, history, Arc::new(FixtureFetcher::from_json_file(path)?))?,
        None => build_pipeline(&cfg, history)?,
    };

    let mut failed = 0;
    for w in &watches {
        match pipeline.run(w, CancellationToken::new()).await {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {e}", w.label);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} runs failed", watches.len());
    }
    Ok(())
}
