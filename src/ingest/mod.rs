// src/ingest/mod.rs
pub mod config;
pub mod guard;
pub mod providers;
pub mod scheduler;
pub mod timestamps;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::change_detector::{ChangeDetector, Classification};
use crate::extract::summary::{derive_summary, normalize_text, summary_from_content};
use crate::extract::{BoundedExtractor, ExtractionOutcome};
use crate::ingest::types::{
    Candidate, ItemPatch, ParsedCandidate, RunInput, SourceAdapter, SourceDescriptor, StoredItem,
};
use crate::store::{ItemStore, WriteBatch};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Ingestion runs that reached the adapter.");
        describe_counter!(
            "ingest_runs_rejected_total",
            "Run requests dropped because the source was already running."
        );
        describe_counter!("ingest_inserted_total", "Items inserted.");
        describe_counter!("ingest_updated_total", "Existing items updated.");
        describe_counter!("ingest_unchanged_total", "Known items left as they were.");
        describe_counter!(
            "ingest_candidate_errors_total",
            "Candidates skipped because of a per-item error."
        );
        describe_counter!("ingest_adapter_errors_total", "Adapter fetch failures.");
        describe_counter!("ingest_commit_errors_total", "Run batches that failed to commit.");
        describe_counter!("ingest_provider_errors_total", "Feed transport errors.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in ms.");
        describe_counter!("extract_outcomes_total", "Bounded extraction outcomes by kind.");
        describe_histogram!("extract_duration_ms", "Bounded extraction wall time in ms.");
        describe_gauge!("ingest_last_run_ts", "Unix ts of the last committed run per source.");
    });
}

/// Which stage a failed run stopped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Rejected,
    UnknownSource,
    MissingInput,
    Adapter,
    Persistence,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("source {0} is already running")]
    Rejected(String),
    #[error("unknown source {0}")]
    UnknownSource(String),
    #[error("source {0} needs an input to run")]
    MissingInput(String),
    #[error("adapter for {source_id} failed: {message}")]
    Adapter { source_id: String, message: String },
    #[error("commit for {source_id} failed, batch discarded: {message}")]
    Persistence { source_id: String, message: String },
}

impl RunError {
    pub fn stage(&self) -> FailureStage {
        match self {
            RunError::Rejected(_) => FailureStage::Rejected,
            RunError::UnknownSource(_) => FailureStage::UnknownSource,
            RunError::MissingInput(_) => FailureStage::MissingInput,
            RunError::Adapter { .. } => FailureStage::Adapter,
            RunError::Persistence { .. } => FailureStage::Persistence,
        }
    }
}

/// Counts for one committed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub source: String,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub candidate_errors: usize,
    /// Change checks spent against the per-run budget.
    pub checks: usize,
    pub reextracted: usize,
    /// Re-extractions that failed and fell back to candidate data.
    pub reextract_fallbacks: usize,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn writes(&self) -> usize {
        self.inserted + self.updated
    }
}

pub struct IngestCoordinator {
    store: Arc<dyn ItemStore>,
    extractor: BoundedExtractor,
    detector: ChangeDetector,
    tz: Tz,
}

impl IngestCoordinator {
    pub fn new(
        store: Arc<dyn ItemStore>,
        extractor: BoundedExtractor,
        detector: ChangeDetector,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            extractor,
            detector,
            tz,
        }
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    pub async fn run(
        &self,
        source: &SourceDescriptor,
        adapter: &dyn SourceAdapter,
        input: &RunInput,
    ) -> Result<RunReport, RunError> {
        self.run_at(source, adapter, input, Utc::now()).await
    }

    /// Fetch, classify and commit one source. Per-candidate errors are
    /// logged and skipped; adapter and commit failures end the run.
    pub async fn run_at(
        &self,
        source: &SourceDescriptor,
        adapter: &dyn SourceAdapter,
        input: &RunInput,
        now: DateTime<Utc>,
    ) -> Result<RunReport, RunError> {
        ensure_metrics_described();
        let t0 = Instant::now();
        counter!("ingest_runs_total").increment(1);

        let candidates = adapter.fetch_candidates(input).await.map_err(|e| {
            tracing::warn!(target: "ingest", source = %source.name, adapter = adapter.name(), error = ?e, "adapter failed");
            counter!("ingest_adapter_errors_total").increment(1);
            RunError::Adapter {
                source_id: source.name.clone(),
                message: format!("{e:#}"),
            }
        })?;

        let mut report = RunReport {
            source: source.name.clone(),
            fetched: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            tracing::info!(target: "ingest", source = %source.name, "no candidates");
        }

        let mut batch = WriteBatch::new();
        let mut pass = self.detector.pass();
        for candidate in candidates {
            let link = candidate.link.clone();
            if let Err(e) = self
                .process(source, candidate, &mut batch, &mut pass, now, &mut report)
                .await
            {
                report.candidate_errors += 1;
                counter!("ingest_candidate_errors_total").increment(1);
                let error = format!("{e:#}");
                tracing::warn!(target: "ingest", source = %source.name, link = %link, %error, "candidate skipped");
            }
        }
        report.checks = pass.checks();

        if !batch.is_empty() {
            let ops = batch.len();
            self.store.commit(batch).await.map_err(|e| {
                tracing::error!(target: "ingest", source = %source.name, ops, error = ?e, "commit failed; run discarded");
                counter!("ingest_commit_errors_total").increment(1);
                RunError::Persistence {
                    source_id: source.name.clone(),
                    message: format!("{e:#}"),
                }
            })?;
        }

        report.duration_ms = t0.elapsed().as_millis() as u64;
        counter!("ingest_inserted_total").increment(report.inserted as u64);
        counter!("ingest_updated_total").increment(report.updated as u64);
        counter!("ingest_unchanged_total").increment(report.unchanged as u64);
        gauge!("ingest_last_run_ts", "source" => source.name.clone()).set(now.timestamp() as f64);

        tracing::info!(
            target: "ingest",
            source = %source.name,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            checks = report.checks,
            errors = report.candidate_errors,
            ms = report.duration_ms,
            "run committed"
        );
        Ok(report)
    }

    async fn process(
        &self,
        source: &SourceDescriptor,
        candidate: Candidate,
        batch: &mut WriteBatch,
        pass: &mut crate::change_detector::DetectorPass<'_>,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> anyhow::Result<()> {
        if candidate.link.trim().is_empty() {
            bail!("candidate has no link");
        }
        let parsed = ParsedCandidate::parse(candidate, self.tz)?;
        let key = parsed.key().to_string();

        // Earlier candidates of this run are visible through the batch, so a
        // key repeated within one feed is never inserted twice.
        let committed = self.store.find_by_key(&key).await?;
        let existing = batch.staged(&key, committed);

        match (pass.classify(existing.as_ref(), &parsed, now), existing) {
            (Classification::New, _) | (_, None) => {
                batch.insert(self.new_item(source, &parsed, now));
                report.inserted += 1;
                tracing::debug!(target: "ingest", key = %key, "new item");
            }
            (Classification::Unchanged(why), Some(_)) => {
                report.unchanged += 1;
                tracing::trace!(target: "ingest", key = %key, ?why, "unchanged");
            }
            (
                Classification::Changed {
                    needs_reextract,
                    reason,
                },
                Some(existing),
            ) => {
                tracing::info!(target: "ingest", key = %key, ?reason, needs_reextract, "item changed");
                let patch = if needs_reextract {
                    self.refresh_patch(&existing, &parsed, now, report).await
                } else {
                    self.basic_patch(&existing, &parsed, now)
                };
                batch.update(key, patch);
                report.updated += 1;
            }
        }
        Ok(())
    }

    fn new_item(
        &self,
        source: &SourceDescriptor,
        parsed: &ParsedCandidate,
        now: DateTime<Utc>,
    ) -> StoredItem {
        let raw = &parsed.raw;
        let summary = derive_summary(raw, self.extractor.config().summary_max_chars);
        let title = normalize_text(&raw.title);
        StoredItem {
            link: parsed.key().to_string(),
            source: source.name.clone(),
            title: if title.is_empty() { summary.clone() } else { title },
            summary,
            content: non_blank(raw.content.as_deref()),
            published_at: parsed.published_at,
            source_updated_at: parsed.updated_at,
            extra: raw.extra.clone(),
            created_at: now,
            last_modified: Some(now),
        }
    }

    /// Update built from the candidate alone. Fields the candidate lacks keep
    /// their stored values.
    fn basic_patch(
        &self,
        existing: &StoredItem,
        parsed: &ParsedCandidate,
        now: DateTime<Utc>,
    ) -> ItemPatch {
        let raw = &parsed.raw;
        let title = normalize_text(&raw.title);
        ItemPatch {
            title: (!title.is_empty() && title != existing.title).then_some(title),
            summary: raw
                .summary
                .as_deref()
                .map(normalize_text)
                .filter(|s| !s.is_empty()),
            content: non_blank(raw.content.as_deref()),
            source_updated_at: newer(existing.source_updated_at, parsed.updated_at),
            extra: raw.extra.clone(),
            last_modified: Some(now),
        }
    }

    /// Re-fetch the stored link under the extraction deadline. Anything short
    /// of usable content falls back to `basic_patch`, so a failed attempt
    /// never removes what the item already had.
    async fn refresh_patch(
        &self,
        existing: &StoredItem,
        parsed: &ParsedCandidate,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> ItemPatch {
        report.reextracted += 1;
        let outcome = self
            .extractor
            .extract_default(&existing.link, &existing.source)
            .await;

        let mut patch = self.basic_patch(existing, parsed, now);

        let fresh_modified = outcome
            .metadata()
            .and_then(|m| m.updated_at.as_deref())
            .and_then(|raw| match timestamps::parse_timestamp(raw, self.tz) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    tracing::debug!(target: "ingest", link = %existing.link, error = %e, "ignoring page modified time");
                    None
                }
            });
        if let Some(ts) = fresh_modified {
            patch.source_updated_at = Some(ts);
        }

        match outcome {
            ExtractionOutcome::Content { content, .. } => {
                patch.summary = Some(summary_from_content(
                    &content,
                    self.extractor.config().summary_max_chars,
                ));
                patch.content = Some(content);
            }
            other => {
                report.reextract_fallbacks += 1;
                tracing::warn!(
                    target: "ingest",
                    link = %existing.link,
                    outcome = other.label(),
                    "re-extraction failed; using scraped fields"
                );
            }
        }
        patch
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

fn newer(current: Option<DateTime<Utc>>, candidate: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (current, candidate) {
        (Some(c), Some(n)) if n > c => Some(n),
        (None, Some(n)) => Some(n),
        _ => None,
    }
}
