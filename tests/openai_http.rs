// tests/openai_http.rs
//
// The OpenAI adapter against a local chat-completions stand-in: failures on
// the wire must end up as neutral scores, never as a failed run.

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use listing_sentinel::crawl::types::Listing;
use listing_sentinel::evaluate::openai::{OpenAiRefiner, OpenAiScorer};
use listing_sentinel::evaluate::{EvaluationFilter, QueryRefiner, NEUTRAL_SCORE};

fn chat_reply(content: &str) -> Json<Value> {
    Json(json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] }))
}

/// Serve a few canned chat endpoints on an ephemeral port; returns the base URL.
async fn spawn_chat_server() -> String {
    let app = Router::new()
        .route("/error", post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream down") }))
        .route("/garbage", post(|| async { chat_reply("not json") }))
        .route(
            "/good",
            post(|| async {
                chat_reply(
                    r#"Here it is: {"match_score": 0.91, "reasoning": "Exact model", "feature_match": "54cm", "quality_assessment": "Clean"}"#,
                )
            }),
        )
        .route("/keywords", post(|| async { chat_reply("\"road bike shimano 105\"") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn listing(id: &str) -> Listing {
    Listing {
        identity: id.into(),
        url: format!("https://sfbay.craigslist.org/bik/{id}.html"),
        title: "Road bike".into(),
        description: "54cm frame, Shimano 105".into(),
        price: "$650".into(),
        location_zip: Some("94105".into()),
    }
}

fn scorer(base: &str, path: &str) -> Arc<OpenAiScorer> {
    Arc::new(
        OpenAiScorer::new("sk-test", "gpt-4o-mini")
            .unwrap()
            .with_endpoint(format!("{base}{path}")),
    )
}

#[tokio::test]
async fn server_error_falls_back_to_neutral_score() {
    let base = spawn_chat_server().await;
    let filter = EvaluationFilter::new(scorer(&base, "/error"));
    let out = filter
        .filter(&[listing("1"), listing("2")], "road bike", 0.5, &CancellationToken::new())
        .await;

    assert_eq!(out.evaluated, 2);
    assert_eq!(out.fallbacks, 2);
    assert_eq!(out.matches.len(), 2, "0.5 clears a 0.5 cutoff");
    for m in &out.matches {
        assert_eq!(m.evaluation.score, NEUTRAL_SCORE);
        assert!(m.evaluation.reasoning.starts_with("Evaluation error:"));
    }
}

#[tokio::test]
async fn unparsable_model_output_falls_back_to_neutral_score() {
    let base = spawn_chat_server().await;
    let filter = EvaluationFilter::new(scorer(&base, "/garbage"));
    let out = filter
        .filter(&[listing("1")], "road bike", 0.7, &CancellationToken::new())
        .await;

    assert_eq!(out.evaluated, 1);
    assert_eq!(out.fallbacks, 1);
    assert!(out.matches.is_empty(), "neutral score stays below a strict cutoff");
}

#[tokio::test]
async fn unreachable_endpoint_falls_back_to_neutral_score() {
    // Bind then drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let filter = EvaluationFilter::new(scorer(&format!("http://{addr}"), "/v1/chat/completions"));
    let out = filter
        .filter(&[listing("1")], "road bike", 0.5, &CancellationToken::new())
        .await;
    assert_eq!(out.fallbacks, 1);
    assert_eq!(out.matches[0].evaluation.score, NEUTRAL_SCORE);
}

#[tokio::test]
async fn well_formed_reply_is_parsed() {
    let base = spawn_chat_server().await;
    let filter = EvaluationFilter::new(scorer(&base, "/good"));
    let out = filter
        .filter(&[listing("1")], "road bike", 0.7, &CancellationToken::new())
        .await;

    assert_eq!(out.fallbacks, 0);
    assert_eq!(out.matches.len(), 1);
    let e = &out.matches[0].evaluation;
    assert!((e.score - 0.91).abs() < 1e-6);
    assert_eq!(e.reasoning, "Exact model");
    assert_eq!(e.feature_assessment, "54cm");
}

#[tokio::test]
async fn refiner_uses_keywords_and_falls_back_to_query() {
    let base = spawn_chat_server().await;
    let ok = OpenAiRefiner::new("sk-test", "gpt-4o-mini")
        .unwrap()
        .with_endpoint(format!("{base}/keywords"));
    assert_eq!(ok.refine("54cm road bike with shimano 105").await, "road bike shimano 105");

    let broken = OpenAiRefiner::new("sk-test", "gpt-4o-mini")
        .unwrap()
        .with_endpoint(format!("{base}/error"));
    assert_eq!(broken.refine("54cm road bike").await, "54cm road bike");
}
