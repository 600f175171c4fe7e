//! # Ingestion Engine
//! Single entry point for every run, scheduled or manual: resolve the source,
//! take its run guard, hand off to the coordinator, record the outcome.
//!
//! Because both paths go through [`IngestEngine::execute`], a manual run and a
//! scheduled tick for the same source exclude each other, not just themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;

use crate::history::{RunHistory, RunRecord, Trigger};
use crate::ingest::guard::{RunGuard, RunState};
use crate::ingest::types::{RunInput, SourceAdapter, SourceDescriptor, SourceKind};
use crate::ingest::{FailureStage, IngestCoordinator, RunError, RunReport};
use crate::profile::normalize_profile_url;

/// A source together with the adapter that scrapes it.
#[derive(Clone)]
pub struct RegisteredSource {
    pub descriptor: SourceDescriptor,
    pub adapter: Arc<dyn SourceAdapter>,
}

/// Result of a manual trigger, shaped for API callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunNowResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<FailureStage>,
}

#[derive(Clone)]
pub struct IngestEngine {
    inner: Arc<Inner>,
}

struct Inner {
    sources: BTreeMap<String, RegisteredSource>,
    guard: Arc<RunGuard>,
    coordinator: IngestCoordinator,
    history: RunHistory,
}

impl IngestEngine {
    pub fn new(coordinator: IngestCoordinator, sources: Vec<RegisteredSource>) -> Self {
        let sources: BTreeMap<_, _> = sources
            .into_iter()
            .map(|s| (s.descriptor.name.clone(), s))
            .collect();
        let guard = Arc::new(RunGuard::with_sources(sources.keys().cloned()));
        Self {
            inner: Arc::new(Inner {
                sources,
                guard,
                coordinator,
                history: RunHistory::default(),
            }),
        }
    }

    pub fn guard(&self) -> &Arc<RunGuard> {
        &self.inner.guard
    }

    pub fn history(&self) -> &RunHistory {
        &self.inner.history
    }

    pub fn coordinator(&self) -> &IngestCoordinator {
        &self.inner.coordinator
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.inner.sources.values().map(|s| &s.descriptor)
    }

    pub fn descriptor(&self, source_id: &str) -> Option<&SourceDescriptor> {
        self.inner.sources.get(source_id).map(|s| &s.descriptor)
    }

    pub fn status(&self) -> BTreeMap<String, RunState> {
        self.inner.guard.status()
    }

    /// Guard → coordinator → guard release. Rejections are expected traffic
    /// and are neither logged as errors nor recorded in history.
    pub async fn execute(
        &self,
        source_id: &str,
        input: RunInput,
        trigger: Trigger,
    ) -> Result<RunReport, RunError> {
        let Some(registered) = self.inner.sources.get(source_id) else {
            return Err(RunError::UnknownSource(source_id.to_string()));
        };
        let input = prepare_input(&registered.descriptor, input)?;

        let Some(_permit) = self.inner.guard.acquire(source_id) else {
            counter!("ingest_runs_rejected_total").increment(1);
            tracing::info!(target: "ingest", source = source_id, ?trigger, "already running; request dropped");
            return Err(RunError::Rejected(source_id.to_string()));
        };

        let started_at = Utc::now();
        tracing::info!(target: "ingest", source = source_id, ?trigger, "run started");
        let result = self
            .inner
            .coordinator
            .run(&registered.descriptor, registered.adapter.as_ref(), &input)
            .await;
        self.inner
            .history
            .push(RunRecord::from_result(source_id, trigger, started_at, &result));
        result
    }

    /// Manual trigger surface.
    pub async fn run_now(&self, source_id: &str, input: RunInput) -> RunNowResponse {
        match self.execute(source_id, input, Trigger::Manual).await {
            Ok(report) => RunNowResponse {
                success: true,
                message: format!(
                    "{}: {} new, {} updated, {} unchanged ({} fetched)",
                    report.source, report.inserted, report.updated, report.unchanged, report.fetched
                ),
                outcome: Some(report),
                stage: None,
            },
            Err(e) => {
                if !matches!(e, RunError::Rejected(_)) {
                    tracing::warn!(target: "ingest", source = source_id, error = %e, "manual run failed");
                }
                RunNowResponse {
                    success: false,
                    message: e.to_string(),
                    outcome: None,
                    stage: Some(e.stage()),
                }
            }
        }
    }
}

/// Profile sources key on a normalized URL, so the caller must say which one.
fn prepare_input(source: &SourceDescriptor, input: RunInput) -> Result<RunInput, RunError> {
    match source.kind {
        SourceKind::News => Ok(input),
        SourceKind::Profile => input
            .target
            .as_deref()
            .and_then(|t| normalize_profile_url(&source.base_url, t))
            .map(RunInput::target)
            .ok_or_else(|| RunError::MissingInput(source.name.clone())),
    }
}
