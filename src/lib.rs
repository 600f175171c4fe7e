// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod change_detector;
pub mod engine;
pub mod extract;
pub mod history;
pub mod ingest;
pub mod metrics;
pub mod profile;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::engine::{IngestEngine, RegisteredSource, RunNowResponse};
pub use crate::ingest::{IngestCoordinator, RunError, RunReport};

use std::sync::Arc;

use anyhow::Result;

use crate::change_detector::ChangeDetector;
use crate::extract::BoundedExtractor;
use crate::extract::ContentReextractor;
use crate::ingest::config::IngestConfig;
use crate::ingest::providers::RssAdapter;
use crate::store::ItemStore;

/// Adapters for every configured source that has a feed. Sources without one
/// are logged and left out; they can still be registered by hand.
pub fn feed_sources(cfg: &IngestConfig) -> Result<Vec<RegisteredSource>> {
    let mut out = Vec::new();
    for descriptor in cfg.descriptors() {
        let feed = cfg
            .source(&descriptor.name)
            .and_then(|s| s.feed_url.as_deref());
        let Some(url) = feed else {
            tracing::warn!(source = %descriptor.name, "no adapter for source, not registered");
            continue;
        };
        let adapter = RssAdapter::from_url(&descriptor.name, url, &cfg.extractor.user_agent)?;
        out.push(RegisteredSource {
            descriptor,
            adapter: Arc::new(adapter),
        });
    }
    Ok(out)
}

/// Wire coordinator and engine from config.
pub fn build_engine(
    cfg: &IngestConfig,
    store: Arc<dyn ItemStore>,
    reextractor: Arc<dyn ContentReextractor>,
    sources: Vec<RegisteredSource>,
) -> Result<IngestEngine> {
    let coordinator = IngestCoordinator::new(
        store,
        BoundedExtractor::new(reextractor, cfg.extractor.clone()),
        ChangeDetector::new(cfg.detector.clone()),
        cfg.tz()?,
    );
    Ok(IngestEngine::new(coordinator, sources))
}
