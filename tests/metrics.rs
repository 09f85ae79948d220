// tests/metrics.rs
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use listing_sentinel::crawl::fixture::FixtureFetcher;
use listing_sentinel::crawl::types::RawListing;
use listing_sentinel::evaluate::MockScorer;
use listing_sentinel::metrics::Metrics;
use listing_sentinel::store::MemorySeenStore;
use listing_sentinel::{Pipeline, WatchConfig, WatchSpec};

// One recorder per process, so everything lives in a single test.
#[tokio::test]
async fn metrics_endpoint_exposes_run_counters() {
    let metrics = Metrics::init().expect("install recorder");
    let app = metrics.router();

    let fetcher = Arc::new(FixtureFetcher::new(vec![RawListing::stub(
        "https://sfbay.craigslist.org/bik/7700000001.html",
        "Bike",
        "$90",
    )]));
    let pipeline = Pipeline::new(fetcher, Arc::new(MockScorer::new(0.9)), Arc::new(MemorySeenStore::new()));
    let spec: WatchSpec =
        serde_json::from_str(r#"{"query":"bike","location":"94105","distance":15}"#).unwrap();
    let watch = WatchConfig::try_from(spec).unwrap();
    pipeline.run(&watch, CancellationToken::new()).await.unwrap();

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "crawl_runs_total",
        "crawl_items_new_total",
        "evaluate_matches_total",
        "seen_set_merges_total",
        "pipeline_last_run_ts",
    ] {
        assert!(text.contains(needle), "metrics exposition missing '{needle}'\n{text}");
    }
}
