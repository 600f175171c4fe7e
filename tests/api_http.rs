// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /status
// - POST /run/{source}  (200 / 400 / 404 / 409 / 500 / 502)
// - GET /runs

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use tokio::sync::Notify;
use tower::ServiceExt as _; // for `oneshot`

use content_ingest::api::{self, AppState};
use content_ingest::change_detector::{ChangeDetector, DetectorConfig};
use content_ingest::engine::{IngestEngine, RegisteredSource};
use content_ingest::extract::{
    BoundedExtractor, ContentReextractor, ExtractError, Extracted, ExtractorConfig,
};
use content_ingest::ingest::types::{
    Candidate, RunInput, SourceAdapter, SourceDescriptor, SourceKind,
};
use content_ingest::ingest::IngestCoordinator;
use content_ingest::store::MemoryStore;

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

struct Static;

#[async_trait::async_trait]
impl SourceAdapter for Static {
    async fn fetch_candidates(&self, input: &RunInput) -> Result<Vec<Candidate>> {
        let link = input
            .target
            .clone()
            .unwrap_or_else(|| "https://www.biziday.ro/a/".into());
        Ok(vec![Candidate {
            title: "Titlu".into(),
            link,
            ..Default::default()
        }])
    }
    fn name(&self) -> &str {
        "static"
    }
}

struct Down;

#[async_trait::async_trait]
impl SourceAdapter for Down {
    async fn fetch_candidates(&self, _input: &RunInput) -> Result<Vec<Candidate>> {
        bail!("timeout")
    }
    fn name(&self) -> &str {
        "down"
    }
}

#[derive(Default)]
struct Gated {
    entered: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl SourceAdapter for Gated {
    async fn fetch_candidates(&self, _input: &RunInput) -> Result<Vec<Candidate>> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(vec![])
    }
    fn name(&self) -> &str {
        "gated"
    }
}

struct Unused;

#[async_trait::async_trait]
impl ContentReextractor for Unused {
    async fn fetch_and_parse(&self, _url: &str, _hint: &str) -> Result<Extracted, ExtractError> {
        Err(ExtractError::Parse("unused".into()))
    }
}

fn src(name: &str, kind: SourceKind, adapter: Arc<dyn SourceAdapter>) -> RegisteredSource {
    RegisteredSource {
        descriptor: SourceDescriptor {
            name: name.into(),
            display_name: name.to_uppercase(),
            base_url: "https://www.facebook.com".into(),
            enabled: true,
            interval: Duration::from_secs(7200),
            manual_only: kind == SourceKind::Profile,
            kind,
        },
        adapter,
    }
}

/// Router over a small engine; the store is handed back for assertions.
fn test_app(gated: Arc<Gated>) -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let coordinator = IngestCoordinator::new(
        store.clone(),
        BoundedExtractor::new(Arc::new(Unused), ExtractorConfig::default()),
        ChangeDetector::new(DetectorConfig::default()),
        chrono_tz::Europe::Bucharest,
    );
    let engine = IngestEngine::new(
        coordinator,
        vec![
            src("biziday", SourceKind::News, Arc::new(Static)),
            src("adevarul", SourceKind::News, Arc::new(Down)),
            src("facebook", SourceKind::Profile, Arc::new(Static)),
            src("slow", SourceKind::News, gated),
        ],
    );
    (api::router(AppState { engine }, None), store)
}

async fn json_body(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build POST")
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_app(Arc::default());
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "ok");
}

#[tokio::test]
async fn status_lists_every_source_idle() {
    let (app, _) = test_app(Arc::default());
    let resp = app
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    let names: Vec<_> = v.as_object().unwrap().keys().cloned().collect();
    assert_eq!(names, vec!["adevarul", "biziday", "facebook", "slow"]);
    assert_eq!(v["facebook"]["state"], "idle");
    assert_eq!(v["facebook"]["manual_only"], true);
}

#[tokio::test]
async fn run_status_codes_follow_failure_stage() {
    let (app, store) = test_app(Arc::default());

    let ok = app.clone().oneshot(post("/run/biziday", "")).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let v = json_body(ok).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["outcome"]["inserted"], 1);
    assert!(store.get("https://www.biziday.ro/a/").is_some());

    let unknown = app.clone().oneshot(post("/run/digi24", "{}")).await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(unknown).await["stage"], "unknown_source");

    let missing = app.clone().oneshot(post("/run/facebook", "{}")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let down = app.clone().oneshot(post("/run/adevarul", "")).await.unwrap();
    assert_eq!(down.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(down).await["stage"], "adapter");

    let garbage = app.clone().oneshot(post("/run/biziday", "{nope")).await.unwrap();
    assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);

    store.set_fail_commits(true);
    let profile = app
        .clone()
        .oneshot(post("/run/facebook", r#"{"input":"100012345"}"#))
        .await
        .unwrap();
    assert_eq!(profile.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(profile).await["stage"], "persistence");

    store.set_fail_commits(false);
    let profile = app
        .oneshot(post("/run/facebook", r#"{"input":"100012345"}"#))
        .await
        .unwrap();
    assert_eq!(profile.status(), StatusCode::OK);
    assert!(store
        .get("https://www.facebook.com/profile.php?id=100012345")
        .is_some());
}

#[tokio::test]
async fn second_trigger_while_running_gets_409() {
    let gated = Arc::new(Gated::default());
    let (app, _) = test_app(gated.clone());

    let first = tokio::spawn(app.clone().oneshot(post("/run/slow", "")));
    gated.entered.notified().await;

    let second = app.clone().oneshot(post("/run/slow", "")).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(second).await["stage"], "rejected");

    gated.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let runs = app
        .oneshot(Request::get("/runs?limit=5").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let v = json_body(runs).await;
    let rows = v.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["source"], "slow");
    assert_eq!(rows[0]["trigger"], "manual");
}

#[tokio::test]
async fn dropped_request_still_finishes_the_run() {
    let gated = Arc::new(Gated::default());
    let (app, _) = test_app(gated.clone());

    // the client goes away while the run is inside the adapter
    let request = tokio::spawn(app.clone().oneshot(post("/run/slow", "")));
    gated.entered.notified().await;
    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());

    gated.release.notify_one();
    let mut rows = Vec::new();
    for _ in 0..100 {
        let runs = app
            .clone()
            .oneshot(Request::get("/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        rows = json_body(runs).await.as_array().unwrap().clone();
        if !rows.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["source"], "slow");

    let status = app
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(status).await["slow"]["state"], "idle");
}
