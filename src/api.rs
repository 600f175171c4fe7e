use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::engine::{IngestEngine, RunNowResponse};
use crate::history::RunRecord;
use crate::ingest::guard::RunState;
use crate::ingest::types::RunInput;
use crate::ingest::FailureStage;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub engine: IngestEngine,
}

/// Build the HTTP surface. `/metrics` is mounted only when a recorder is
/// installed.
pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/run/{source}", post(run_source))
        .route("/runs", get(runs))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    match metrics {
        Some(m) => app.merge(m.router()),
        None => app,
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct SourceStatus {
    display_name: String,
    state: RunState,
    enabled: bool,
    manual_only: bool,
    interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run: Option<RunRecord>,
}

async fn status(State(state): State<AppState>) -> Json<BTreeMap<String, SourceStatus>> {
    let guard = state.engine.status();
    let out = state
        .engine
        .descriptors()
        .map(|d| {
            let st = guard.get(&d.name).copied().unwrap_or(RunState::Idle);
            (
                d.name.clone(),
                SourceStatus {
                    display_name: d.display_name.clone(),
                    state: st,
                    enabled: d.enabled,
                    manual_only: d.manual_only,
                    interval_secs: d.interval.as_secs(),
                    last_run: state.engine.history().last_for(&d.name),
                },
            )
        })
        .collect();
    Json(out)
}

#[derive(Debug, Default, Deserialize)]
struct RunReq {
    #[serde(default)]
    input: Option<String>,
}

async fn run_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<RunNowResponse>) {
    // Body is optional; `{}` and no body at all mean "no input".
    let req: RunReq = if body.iter().all(u8::is_ascii_whitespace) {
        RunReq::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(RunNowResponse {
                        success: false,
                        message: format!("invalid request body: {e}"),
                        outcome: None,
                        stage: None,
                    }),
                )
            }
        }
    };
    let input = RunInput { target: req.input };
    // Detached so a client hanging up does not cancel a run halfway.
    let engine = state.engine.clone();
    let run = tokio::spawn(async move { engine.run_now(&source, input).await });
    match run.await {
        Ok(resp) => (status_for(resp.stage), Json(resp)),
        Err(e) => {
            tracing::error!(error = %e, "manual run task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RunNowResponse {
                    success: false,
                    message: format!("run aborted: {e}"),
                    outcome: None,
                    stage: None,
                }),
            )
        }
    }
}

fn status_for(stage: Option<FailureStage>) -> StatusCode {
    match stage {
        None => StatusCode::OK,
        Some(FailureStage::Rejected) => StatusCode::CONFLICT,
        Some(FailureStage::UnknownSource) => StatusCode::NOT_FOUND,
        Some(FailureStage::MissingInput) => StatusCode::BAD_REQUEST,
        Some(FailureStage::Adapter) => StatusCode::BAD_GATEWAY,
        Some(FailureStage::Persistence) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn runs(State(state): State<AppState>, Query(q): Query<RunsQuery>) -> Json<Vec<RunRecord>> {
    let n = q.limit.unwrap_or(20).clamp(1, 200);
    Json(state.engine.history().snapshot_last_n(n))
}
