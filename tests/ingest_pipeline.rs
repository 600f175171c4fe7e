// tests/ingest_pipeline.rs
//
// Coordinator runs against an in-memory store with a fixed clock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use content_ingest::change_detector::{ChangeDetector, DetectorConfig};
use content_ingest::extract::{
    BoundedExtractor, ContentReextractor, ExtractError, ExtractMetadata, Extracted,
    ExtractorConfig,
};
use content_ingest::ingest::types::{
    Candidate, RunInput, SourceAdapter, SourceDescriptor, SourceKind, StoredItem,
};
use content_ingest::ingest::{IngestCoordinator, RunError};
use content_ingest::store::{ItemStore, MemoryStore};

// ---------------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------------

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 14, 12, 0, 0).unwrap()
}

fn biziday() -> SourceDescriptor {
    SourceDescriptor {
        name: "biziday".into(),
        display_name: "Biziday".into(),
        base_url: "https://www.biziday.ro".into(),
        enabled: true,
        interval: Duration::from_secs(7200),
        manual_only: false,
        kind: SourceKind::News,
    }
}

/// Stored two days ago, last checked 30h ago: eligible for a check.
fn stored(link: &str, content: &str, updated: DateTime<Utc>) -> StoredItem {
    StoredItem {
        link: link.into(),
        source: "biziday".into(),
        title: "Titlu".into(),
        summary: "Rezumat".into(),
        content: Some(content.into()),
        published_at: Some(now() - chrono::Duration::days(2)),
        source_updated_at: Some(updated),
        extra: None,
        created_at: now() - chrono::Duration::days(2),
        last_modified: Some(now() - chrono::Duration::hours(30)),
    }
}

fn candidate(link: &str, content: Option<&str>, updated: Option<DateTime<Utc>>) -> Candidate {
    Candidate {
        title: "Titlu".into(),
        summary: None,
        content: content.map(str::to_string),
        link: link.into(),
        published_at: Some((now() - chrono::Duration::days(2)).to_rfc3339()),
        updated_at: updated.map(|t| t.to_rfc3339()),
        extra: None,
    }
}

struct Feed(Mutex<Vec<Candidate>>);

impl Feed {
    fn new(items: Vec<Candidate>) -> Self {
        Self(Mutex::new(items))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for Feed {
    async fn fetch_candidates(&self, _input: &RunInput) -> Result<Vec<Candidate>> {
        Ok(self.0.lock().clone())
    }
    fn name(&self) -> &str {
        "feed"
    }
}

struct Unreachable;

#[async_trait::async_trait]
impl SourceAdapter for Unreachable {
    async fn fetch_candidates(&self, _input: &RunInput) -> Result<Vec<Candidate>> {
        bail!("503 from upstream")
    }
    fn name(&self) -> &str {
        "unreachable"
    }
}

/// Never answers.
struct Hanging;

#[async_trait::async_trait]
impl ContentReextractor for Hanging {
    async fn fetch_and_parse(&self, _url: &str, _hint: &str) -> Result<Extracted, ExtractError> {
        std::future::pending().await
    }
}

/// Answers with fixed content and records every url asked for.
struct Fresh {
    content: String,
    modified: Option<String>,
    calls: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ContentReextractor for Fresh {
    async fn fetch_and_parse(&self, url: &str, _hint: &str) -> Result<Extracted, ExtractError> {
        self.calls.lock().push(url.to_string());
        Ok(Extracted {
            content: Some(self.content.clone()),
            metadata: ExtractMetadata {
                published_at: None,
                updated_at: self.modified.clone(),
            },
        })
    }
}

fn coordinator(
    store: Arc<MemoryStore>,
    reextractor: Arc<dyn ContentReextractor>,
    detector: DetectorConfig,
) -> IngestCoordinator {
    let extractor = ExtractorConfig {
        timeout_secs: 5,
        ..Default::default()
    };
    IngestCoordinator::new(
        store,
        BoundedExtractor::new(reextractor, extractor),
        ChangeDetector::new(detector),
        chrono_tz::Europe::Bucharest,
    )
}

// ---------------------------------------------------------------------------
// tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_candidate_is_unchanged_and_writes_nothing() {
    let t0 = now() - chrono::Duration::days(2);
    let a50 = "A".repeat(50);
    let store = Arc::new(MemoryStore::with_items([stored("https://x/1", &a50, t0)]));
    let before = store.snapshot();
    // any commit attempt would now fail the run
    store.set_fail_commits(true);

    let c = coordinator(store.clone(), Arc::new(Hanging), DetectorConfig::default());
    let feed = Feed::new(vec![candidate("https://x/1", Some(&a50), Some(t0))]);
    let report = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .expect("no writes, no commit");

    assert_eq!(report.unchanged, 1);
    assert_eq!(report.writes(), 0);
    assert_eq!(store.snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn newer_source_time_with_timed_out_refresh_keeps_content() {
    let t0 = now() - chrono::Duration::days(2);
    let t1 = now() - chrono::Duration::hours(1);
    let a50 = "A".repeat(50);
    let store = Arc::new(MemoryStore::with_items([stored("https://x/1", &a50, t0)]));

    let c = coordinator(store.clone(), Arc::new(Hanging), DetectorConfig::default());
    let feed = Feed::new(vec![candidate("https://x/1", None, Some(t1))]);

    let started = tokio::time::Instant::now();
    let report = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();
    let waited = started.elapsed();

    assert_eq!(report.updated, 1);
    assert_eq!(report.reextracted, 1);
    assert_eq!(report.reextract_fallbacks, 1);
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));

    let item = store.get("https://x/1").unwrap();
    assert_eq!(item.content.as_deref(), Some(a50.as_str()));
    assert_eq!(item.source_updated_at, Some(t1));
    assert_eq!(item.last_modified, Some(now()));
}

#[tokio::test]
async fn successful_refresh_uses_stored_link_and_page_time() {
    let t0 = now() - chrono::Duration::days(2);
    let t1 = now() - chrono::Duration::hours(2);
    let store = Arc::new(MemoryStore::with_items([stored("https://x/1", "old body", t0)]));
    let fresh = Arc::new(Fresh {
        content: "Noul continut al articolului. ".repeat(10),
        modified: Some("2025-10-14 13:30:00".into()),
        calls: Mutex::new(Vec::new()),
    });

    let c = coordinator(store.clone(), fresh.clone(), DetectorConfig::default());
    // whitespace around the link must not change which item is refreshed
    let feed = Feed::new(vec![candidate("  https://x/1 ", None, Some(t1))]);
    let report = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.reextract_fallbacks, 0);
    assert_eq!(*fresh.calls.lock(), vec!["https://x/1".to_string()]);

    let item = store.get("https://x/1").unwrap();
    assert!(item.content.unwrap().starts_with("Noul continut"));
    assert!(item.summary.starts_with("Noul continut"));
    // 13:30 Bucharest (EEST) is 10:30 UTC
    assert_eq!(
        item.source_updated_at,
        Some(Utc.with_ymd_and_hms(2025, 10, 14, 10, 30, 0).unwrap())
    );
}

#[tokio::test]
async fn short_refresh_keeps_content_but_takes_page_time_and_feed_fields() {
    let t0 = now() - chrono::Duration::days(2);
    let t1 = now() - chrono::Duration::hours(3);
    let a50 = "A".repeat(50);
    let store = Arc::new(MemoryStore::with_items([stored("https://x/1", &a50, t0)]));
    let fresh = Arc::new(Fresh {
        content: "Doar un paragraf scurt.".into(),
        modified: Some("2025-10-14T11:15:00Z".into()),
        calls: Mutex::new(Vec::new()),
    });

    let c = coordinator(store.clone(), fresh.clone(), DetectorConfig::default());
    let feed = Feed::new(vec![Candidate {
        title: "Titlu actualizat".into(),
        summary: Some("Rezumat nou din feed".into()),
        ..candidate("https://x/1", None, Some(t1))
    }]);
    let report = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.reextracted, 1);
    assert_eq!(report.reextract_fallbacks, 1);
    assert_eq!(fresh.calls.lock().len(), 1);

    let item = store.get("https://x/1").unwrap();
    assert_eq!(item.content.as_deref(), Some(a50.as_str()));
    assert_eq!(item.title, "Titlu actualizat");
    assert_eq!(item.summary, "Rezumat nou din feed");
    assert_eq!(
        item.source_updated_at,
        Some(Utc.with_ymd_and_hms(2025, 10, 14, 11, 15, 0).unwrap())
    );
    assert_eq!(item.last_modified, Some(now()));
}

#[tokio::test]
async fn unnormalized_titles_stay_unchanged_across_runs() {
    let store = Arc::new(MemoryStore::new());
    let c = coordinator(store.clone(), Arc::new(Hanging), DetectorConfig::default());
    let feed = Feed::new(vec![Candidate {
        title: "Guvernul \u{201E}aprob\u{103}\u{201D}  bugetul".into(),
        summary: Some(" Bugetul &amp; deficitul, <b>pe scurt</b> ".into()),
        ..candidate("https://x/1", None, None)
    }]);

    let first_at = now() - chrono::Duration::hours(30);
    let first = c
        .run_at(&biziday(), &feed, &RunInput::default(), first_at)
        .await
        .unwrap();
    assert_eq!(first.inserted, 1);

    let item = store.get("https://x/1").unwrap();
    assert_eq!(item.title, "Guvernul \"aprob\u{103}\" bugetul");
    assert_eq!(item.summary, "Bugetul & deficitul, pe scurt");

    // past the 24h floor, so the item is actually compared
    let second = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();
    assert_eq!(second.checks, 1);
    assert_eq!(second.unchanged, 1);
    assert_eq!(second.writes(), 0);
    assert_eq!(store.get("https://x/1").unwrap(), item);
}

#[tokio::test]
async fn repeated_runs_insert_each_key_once() {
    let store = Arc::new(MemoryStore::new());
    let c = coordinator(store.clone(), Arc::new(Hanging), DetectorConfig::default());
    let feed = Feed::new(vec![
        candidate("https://x/1", Some("corp"), None),
        candidate("https://x/2", None, None),
        // same key twice in one feed
        candidate("https://x/1", Some("corp"), None),
    ]);

    let first = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();
    assert_eq!(first.inserted, 2);

    let second = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(store.len().await.unwrap(), 2);

    // summary falls back to content, then title
    assert_eq!(store.get("https://x/1").unwrap().summary, "corp");
    assert_eq!(store.get("https://x/2").unwrap().summary, "Titlu");
}

#[tokio::test]
async fn checks_per_run_never_exceed_cap() {
    let t0 = now() - chrono::Duration::days(2);
    let links: Vec<String> = (0..5).map(|i| format!("https://x/{i}")).collect();
    let store = Arc::new(MemoryStore::with_items(
        links.iter().map(|l| stored(l, "corp", t0)),
    ));
    let detector = DetectorConfig {
        max_checks_per_run: 2,
        ..Default::default()
    };
    let c = coordinator(store.clone(), Arc::new(Hanging), detector);

    let feed = Feed::new(
        links
            .iter()
            .map(|l| Candidate {
                title: "Titlu nou".into(),
                ..candidate(l, Some("corp"), Some(t0))
            })
            .collect(),
    );
    let report = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();

    assert_eq!(report.checks, 2);
    assert_eq!(report.updated, 2);
    assert_eq!(report.unchanged, 3);
}

#[tokio::test]
async fn failed_commit_applies_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.set_fail_commits(true);
    let c = coordinator(store.clone(), Arc::new(Hanging), DetectorConfig::default());
    let feed = Feed::new(vec![
        candidate("https://x/1", None, None),
        candidate("https://x/2", None, None),
    ]);

    let err = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Persistence { .. }));
    assert!(store.snapshot().is_empty());

    // next tick goes through
    store.set_fail_commits(false);
    let report = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
}

#[tokio::test]
async fn bad_candidate_only_sinks_itself() {
    let store = Arc::new(MemoryStore::new());
    let c = coordinator(store.clone(), Arc::new(Hanging), DetectorConfig::default());
    let feed = Feed::new(vec![
        Candidate {
            published_at: Some("ieri dupa-amiaza".into()),
            ..candidate("https://x/bad", None, None)
        },
        candidate("", None, None),
        candidate("https://x/ok", None, None),
    ]);

    let report = c
        .run_at(&biziday(), &feed, &RunInput::default(), now())
        .await
        .unwrap();
    assert_eq!(report.candidate_errors, 2);
    assert_eq!(report.inserted, 1);
    assert!(store.get("https://x/ok").is_some());
}

#[tokio::test]
async fn unreachable_source_is_an_adapter_failure() {
    let store = Arc::new(MemoryStore::new());
    let c = coordinator(store, Arc::new(Hanging), DetectorConfig::default());
    let err = c
        .run_at(&biziday(), &Unreachable, &RunInput::default(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Adapter { .. }));
}

#[tokio::test]
async fn empty_feed_is_a_successful_run() {
    let store = Arc::new(MemoryStore::new());
    let c = coordinator(store, Arc::new(Hanging), DetectorConfig::default());
    let report = c
        .run_at(&biziday(), &Feed::new(vec![]), &RunInput::default(), now())
        .await
        .unwrap();
    assert_eq!(report.fetched, 0);
    assert_eq!(report.writes(), 0);
}
