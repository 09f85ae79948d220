use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::config::{WatchConfig, WatchSpec};
use crate::error::RunError;
use crate::pipeline::Pipeline;
use crate::report::LogEntry;
use crate::scheduler::trigger_now;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/run", post(run_now))
        .route("/history", get(history))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    error: String,
}

fn error_response(status: StatusCode, kind: &'static str, error: String) -> Response {
    (status, Json(ErrorBody { kind, error })).into_response()
}

async fn run_now(State(state): State<AppState>, Json(spec): Json<WatchSpec>) -> Response {
    let watch = match WatchConfig::try_from(spec) {
        Ok(w) => w,
        Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, "config", e.to_string()),
    };

    match trigger_now(state.pipeline.clone(), watch, &state.shutdown).await {
        Ok(Ok(report)) => Json(report).into_response(),
        Ok(Err(e)) => {
            let status = match &e {
                RunError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
                RunError::Busy(_) => StatusCode::CONFLICT,
                RunError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            error_response(status, e.kind(), e.to_string())
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "run task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", join_err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct HistoryParams {
    n: Option<usize>,
    label: Option<String>,
}

async fn history(State(state): State<AppState>, Query(p): Query<HistoryParams>) -> Json<Vec<LogEntry>> {
    let n = p.n.unwrap_or(50).min(2000);
    let h = state.pipeline.history();
    Json(match p.label {
        Some(label) => h.for_label(&label, n),
        None => h.snapshot_last_n(n),
    })
}
