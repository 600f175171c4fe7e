//! Content Ingest: binary entrypoint.
//! Loads config, opens the store, starts per-source timers and serves the
//! manual trigger / status surface.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use content_ingest::api::{self, AppState};
use content_ingest::extract::http::HttpReextractor;
use content_ingest::ingest::config::load_config_default;
use content_ingest::ingest::scheduler::spawn_scheduler;
use content_ingest::metrics::Metrics;
use content_ingest::store::JsonFileStore;
use content_ingest::{build_engine, feed_sources};

/// Compact logs by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("content_ingest=info,ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default().context("loading ingest config")?;
    tracing::info!(
        sources = cfg.sources.len(),
        testing_mode = cfg.scheduler.testing_mode,
        timezone = %cfg.timezone,
        "config loaded"
    );

    let store = Arc::new(JsonFileStore::open(&cfg.store.path).await?);
    let reextractor = Arc::new(HttpReextractor::new(&cfg.extractor)?);
    let sources = feed_sources(&cfg)?;
    let engine = build_engine(&cfg, store, reextractor, sources)?;

    let metrics = Metrics::init(engine.descriptors().count())?;
    let scheduler = spawn_scheduler(engine.clone(), &cfg.scheduler);
    tracing::info!(
        timers = ?scheduler.registered_sources(),
        warmups = ?scheduler.warmup_sources(),
        "scheduler started"
    );

    let app = api::router(AppState { engine }, Some(&metrics));
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    tracing::info!(bind = %cfg.server.bind, "http listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    scheduler.shutdown();
    Ok(())
}
